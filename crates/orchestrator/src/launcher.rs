//! Shard process launching.
//!
//! Abstracts how a shard's integrator process is started so the coordinator
//! can be driven by scripted processes in tests.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Starts the external process for one shard.
///
/// The returned child must have piped stdout and stderr; the coordinator
/// reads both as one line stream.
pub trait ShardLauncher: Send + Sync {
    fn launch(&self, shard_index: usize, case_id: &str) -> std::io::Result<Child>;
}

/// Runs the built integrator as `<executable> <case_id>` inside the run
/// directory, where the shard's run artifact lives.
#[derive(Debug, Clone)]
pub struct IntegratorLauncher {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
}

impl IntegratorLauncher {
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_dir: working_dir.into(),
        }
    }
}

impl ShardLauncher for IntegratorLauncher {
    fn launch(&self, _shard_index: usize, case_id: &str) -> std::io::Result<Child> {
        Command::new(&self.executable)
            .arg(case_id)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

pub mod mock {
    //! Scripted launcher for tests.
    //!
    //! Each shard runs a `sh -c` script chosen by shard index, so tests can
    //! emit progress markers, log noise and arbitrary exit codes without the
    //! real integrator.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct ScriptedLauncher {
        scripts: HashMap<usize, String>,
        fallback: String,
        launched: Mutex<Vec<(usize, String)>>,
    }

    impl ScriptedLauncher {
        /// Launcher whose shards run `fallback` unless given their own script.
        pub fn new(fallback: impl Into<String>) -> Self {
            Self {
                scripts: HashMap::new(),
                fallback: fallback.into(),
                launched: Mutex::new(Vec::new()),
            }
        }

        pub fn with_script(mut self, shard_index: usize, script: impl Into<String>) -> Self {
            self.scripts.insert(shard_index, script.into());
            self
        }

        /// `(shard_index, case_id)` of every launch, in launch order.
        pub fn launched(&self) -> Vec<(usize, String)> {
            self.launched
                .lock()
                .expect("ScriptedLauncher launched mutex poisoned")
                .clone()
        }
    }

    impl ShardLauncher for ScriptedLauncher {
        fn launch(&self, shard_index: usize, case_id: &str) -> std::io::Result<Child> {
            self.launched
                .lock()
                .expect("ScriptedLauncher launched mutex poisoned")
                .push((shard_index, case_id.to_string()));

            let script = self.scripts.get(&shard_index).unwrap_or(&self.fallback);
            Command::new("sh")
                .arg("-c")
                .arg(script)
                .arg("integrator")
                .arg(case_id)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
        }
    }
}
