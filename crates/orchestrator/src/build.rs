//! Integrator build selection.
//!
//! The integrator source tree carries one build descriptor per coordinate
//! system. Each descriptor has a single flags line (`<flags_key> = ...`); the
//! inverse-direction token on that line decides whether the executable
//! integrates backward in time. The selected descriptor is adjusted as an
//! immutable value, written back atomically, and then built once (clean, then
//! build) for all shards.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::run_config::{CoordinateSystem, Direction};
use crate::settings::Settings;

/// A parsed build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    lines: Vec<String>,
    flags_line: usize,
    flags_key: String,
    flags: Vec<String>,
    /// Trailing `# ...` comment of the flags line, kept after the flags.
    comment: Option<String>,
}

impl BuildDescriptor {
    /// Parse descriptor text, locating the line whose key is `flags_key`.
    pub fn parse(path: &Path, text: &str, flags_key: &str) -> Result<Self> {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let (flags_line, flags, comment) = lines
            .iter()
            .enumerate()
            .find_map(|(index, line)| {
                let (key, value) = line.split_once('=')?;
                (key.trim() == flags_key).then(|| {
                    let (value, comment) = match value.split_once('#') {
                        Some((value, comment)) => (value, Some(format!("#{comment}"))),
                        None => (value, None),
                    };
                    let flags = value.split_whitespace().map(str::to_string).collect::<Vec<_>>();
                    (index, flags, comment)
                })
            })
            .ok_or_else(|| Error::BuildDescriptor {
                path: path.to_path_buf(),
                message: format!("no '{flags_key} =' line"),
            })?;

        Ok(Self {
            lines,
            flags_line,
            flags_key: flags_key.to_string(),
            flags,
            comment,
        })
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn has_flag(&self, token: &str) -> bool {
        self.flags.iter().any(|flag| flag == token)
    }

    /// Descriptor with `token` present exactly when `direction` is inverse.
    pub fn with_direction(&self, direction: Direction, token: &str) -> Self {
        let mut flags: Vec<String> = self
            .flags
            .iter()
            .filter(|flag| flag.as_str() != token)
            .cloned()
            .collect();
        if direction == Direction::Inverse {
            flags.push(token.to_string());
        }

        let mut line = format!("{} =", self.flags_key);
        for flag in &flags {
            line.push(' ');
            line.push_str(flag);
        }
        if let Some(comment) = &self.comment {
            line.push(' ');
            line.push_str(comment);
        }
        let mut lines = self.lines.clone();
        lines[self.flags_line] = line;

        Self {
            lines,
            flags_line: self.flags_line,
            flags_key: self.flags_key.clone(),
            flags,
            comment: self.comment.clone(),
        }
    }

    /// Replace `path` with this descriptor through a temporary file in the
    /// same directory.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
        file.write_all(self.to_string().as_bytes())
            .map_err(|err| Error::io(path, err))?;
        file.persist(path).map_err(|err| Error::io(path, err.error))?;
        Ok(())
    }
}

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Everything needed to produce the shared integrator executable.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub source_dir: PathBuf,
    /// Descriptor path relative to `source_dir`.
    pub descriptor: PathBuf,
    pub program: String,
    pub flags_key: String,
    pub inverse_flag: String,
    pub executable: PathBuf,
}

impl BuildPlan {
    pub fn from_settings(settings: &Settings, coordinates: CoordinateSystem) -> Self {
        let build = &settings.build;
        let descriptor = match coordinates {
            CoordinateSystem::Geographic => build.geographic_descriptor.clone(),
            CoordinateSystem::Projected => build.projected_descriptor.clone(),
        };
        Self {
            source_dir: build.source_dir.clone(),
            descriptor,
            program: build.program.clone(),
            flags_key: build.flags_key.clone(),
            inverse_flag: build.inverse_flag.clone(),
            executable: settings.executable_path(),
        }
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.source_dir.join(&self.descriptor)
    }

    /// Select the descriptor for `direction`, then clean and build. Returns the
    /// executable path.
    pub async fn run(&self, direction: Direction) -> Result<PathBuf> {
        let path = self.descriptor_path();
        let text = std::fs::read_to_string(&path).map_err(|err| Error::io(&path, err))?;
        let current = BuildDescriptor::parse(&path, &text, &self.flags_key)?;
        let selected = current.with_direction(direction, &self.inverse_flag);

        if selected.flags() != current.flags() {
            selected.write_atomic(&path)?;
            info!(
                "Build descriptor {} set for {direction} integration",
                path.display()
            );
        } else {
            debug!("Build descriptor {} already set for {direction}", path.display());
        }

        self.invoke("clean", &["clean"]).await?;
        self.invoke("build", &[]).await?;
        info!("Integrator built: {}", self.executable.display());
        Ok(self.executable.clone())
    }

    async fn invoke(&self, step: &'static str, extra: &[&str]) -> Result<()> {
        info!(
            "Running {} -f {} {} in {}",
            self.program,
            self.descriptor.display(),
            extra.join(" "),
            self.source_dir.display()
        );
        let output = Command::new(&self.program)
            .arg("-f")
            .arg(&self.descriptor)
            .args(extra)
            .current_dir(&self.source_dir)
            .output()
            .await
            .map_err(|err| Error::io(&self.program, err))?;

        for line in String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
        {
            debug!("[{step}] {line}");
        }

        if !output.status.success() {
            return Err(Error::Build {
                step,
                descriptor: self.descriptor_path(),
                status: output.status.code(),
            });
        }
        Ok(())
    }
}
