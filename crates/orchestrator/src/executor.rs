//! Parallel shard supervision.
//!
//! One tokio task per shard starts the shard's integrator process, reads its
//! stdout and stderr as a single line stream, and feeds progress markers into
//! the shared [`ProgressBoard`]. The coordinator joins every task; one shard
//! failing never stops the others.
//!
//! ```text
//! Coordinator::start
//!   ├─ task 0: launch ─ read lines ─ board.record ─ wait
//!   ├─ task 1: launch ─ read lines ─ board.record ─ wait
//!   └─ ...
//! Execution::join ──→ ExecutionReport { outcomes, progress, aggregate }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::describe_status;
use crate::launcher::ShardLauncher;
use crate::partition::Shard;
use crate::progress::{ProgressBoard, ProgressMarker, ShardProgress};

/// What the coordinator needs to run one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardJob {
    pub index: usize,
    pub case_id: String,
}

impl From<&Shard> for ShardJob {
    fn from(shard: &Shard) -> Self {
        Self {
            index: shard.index,
            case_id: shard.case_id().to_string(),
        }
    }
}

/// How a shard's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardStatus {
    /// Process exited; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Process could not be started.
    LaunchFailed(String),
    /// Process was killed through its cancellation token.
    Cancelled,
    /// Waiting on the process failed.
    WaitFailed(String),
}

impl ShardStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, ShardStatus::Exited(Some(0)))
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardStatus::Exited(code) => write!(f, "{}", describe_status(*code)),
            ShardStatus::LaunchFailed(message) => write!(f, "launch failed: {message}"),
            ShardStatus::Cancelled => write!(f, "cancelled"),
            ShardStatus::WaitFailed(message) => write!(f, "wait failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutcome {
    pub index: usize,
    pub case_id: String,
    pub status: ShardStatus,
}

/// A shard that did not exit cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub index: usize,
    pub case_id: String,
    /// Exit code, when the process ran and exited normally.
    pub exit_code: Option<i32>,
    pub status: ShardStatus,
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} ({}): {}", self.index, self.case_id, self.status)
    }
}

/// Result of running every shard to completion.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcomes: Vec<ShardOutcome>,
    pub progress: Vec<ShardProgress>,
    pub aggregate_percent: f64,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.status.succeeded())
    }

    pub fn failures(&self) -> Vec<ShardFailure> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.status.succeeded())
            .map(|outcome| ShardFailure {
                index: outcome.index,
                case_id: outcome.case_id.clone(),
                exit_code: match outcome.status {
                    ShardStatus::Exited(code) => code,
                    _ => None,
                },
                status: outcome.status.clone(),
            })
            .collect()
    }
}

/// Per-shard cancellation handle.
///
/// Cancelling kills the shard's process; the shard is then reported as
/// [`ShardStatus::Cancelled`]. Other shards are unaffected.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl CancelToken {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (Self(Arc::new(sender)), receiver)
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Launches and supervises shard processes.
#[derive(Clone)]
pub struct Coordinator {
    launcher: Arc<dyn ShardLauncher>,
}

impl Coordinator {
    pub fn new(launcher: impl ShardLauncher + 'static) -> Self {
        Self {
            launcher: Arc::new(launcher),
        }
    }

    pub fn from_shared(launcher: Arc<dyn ShardLauncher>) -> Self {
        Self { launcher }
    }

    /// Start one worker task per job. Must be called within a tokio runtime.
    pub fn start(&self, jobs: Vec<ShardJob>) -> Execution {
        let board = Arc::new(ProgressBoard::new(jobs.iter().map(|job| job.index)));
        let mut workers = Vec::with_capacity(jobs.len());
        let mut tokens = BTreeMap::new();

        info!("Launching {} shard process(es)", jobs.len());
        for job in jobs {
            let (token, cancel) = CancelToken::new();
            tokens.insert(job.index, token);
            let handle = tokio::spawn(supervise(
                job.clone(),
                Arc::clone(&self.launcher),
                Arc::clone(&board),
                cancel,
            ));
            workers.push((job, handle));
        }

        Execution {
            board,
            workers,
            tokens,
        }
    }

    /// Run every job to completion.
    pub async fn run(&self, jobs: Vec<ShardJob>) -> ExecutionReport {
        self.start(jobs).join().await
    }
}

/// Shards in flight.
pub struct Execution {
    board: Arc<ProgressBoard>,
    workers: Vec<(ShardJob, JoinHandle<ShardStatus>)>,
    tokens: BTreeMap<usize, CancelToken>,
}

impl Execution {
    pub fn cancel_token(&self, shard_index: usize) -> Option<CancelToken> {
        self.tokens.get(&shard_index).cloned()
    }

    pub fn board(&self) -> Arc<ProgressBoard> {
        Arc::clone(&self.board)
    }

    /// Wait for every worker to finish.
    pub async fn join(self) -> ExecutionReport {
        let Execution { board, workers, .. } = self;

        let mut outcomes = Vec::with_capacity(workers.len());
        for (job, handle) in workers {
            let status = match handle.await {
                Ok(status) => status,
                Err(err) => ShardStatus::WaitFailed(format!("worker task failed: {err}")),
            };
            outcomes.push(ShardOutcome {
                index: job.index,
                case_id: job.case_id,
                status,
            });
        }

        let report = ExecutionReport {
            outcomes,
            progress: board.snapshot().await,
            aggregate_percent: board.aggregate().await,
        };

        if report.is_success() {
            info!(
                "All {} shard(s) finished ({:.1}%)",
                report.outcomes.len(),
                report.aggregate_percent
            );
        } else {
            warn!(
                "{} of {} shard(s) failed",
                report.failures().len(),
                report.outcomes.len()
            );
        }
        report
    }
}

type LineStream = Split<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

enum Event {
    Line(std::io::Result<Option<Vec<u8>>>, &'static str),
    Cancel(bool),
}

enum Exit {
    Done(std::io::Result<std::process::ExitStatus>),
    Cancel(bool),
}

async fn next_segment(stream: &mut Option<LineStream>) -> std::io::Result<Option<Vec<u8>>> {
    match stream {
        Some(stream) => stream.next_segment().await,
        None => std::future::pending().await,
    }
}

fn line_stream<R: AsyncRead + Send + Unpin + 'static>(reader: Option<R>) -> Option<LineStream> {
    reader.map(|reader| {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        BufReader::new(reader).split(b'\n')
    })
}

fn kill(child: &mut Child, index: usize) {
    warn!("Shard {index}: cancellation requested, killing process");
    if let Err(err) = child.start_kill() {
        warn!("Shard {index}: kill failed: {err}");
    }
}

async fn supervise(
    job: ShardJob,
    launcher: Arc<dyn ShardLauncher>,
    board: Arc<ProgressBoard>,
    mut cancel: watch::Receiver<bool>,
) -> ShardStatus {
    let index = job.index;
    let mut child = match launcher.launch(index, &job.case_id) {
        Ok(child) => child,
        Err(err) => {
            error!("Shard {index} ({}): failed to launch: {err}", job.case_id);
            return ShardStatus::LaunchFailed(err.to_string());
        }
    };
    info!(
        "Shard {index} started: {} (pid {})",
        job.case_id,
        child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
    );

    let mut stdout = line_stream(child.stdout.take());
    let mut stderr = line_stream(child.stderr.take());
    let mut watching = true;
    let mut cancelled = false;

    while stdout.is_some() || stderr.is_some() {
        let event = tokio::select! {
            segment = next_segment(&mut stdout), if stdout.is_some() => Event::Line(segment, "stdout"),
            segment = next_segment(&mut stderr), if stderr.is_some() => Event::Line(segment, "stderr"),
            changed = cancel.changed(), if watching => Event::Cancel(changed.is_ok()),
        };

        match event {
            Event::Line(Ok(Some(bytes)), _) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end();
                match ProgressMarker::parse(line) {
                    Some(marker) => {
                        if let Some(aggregate) = board.record(index, marker).await {
                            info!(
                                "Shard {index}: {} / {} finished, overall {aggregate:.1}%",
                                marker.current, marker.total
                            );
                        }
                    }
                    None => debug!("[shard {index}] {line}"),
                }
            }
            Event::Line(result, name) => {
                if let Err(err) = result {
                    warn!("Shard {index}: reading {name} failed: {err}");
                }
                if name == "stdout" {
                    stdout = None;
                } else {
                    stderr = None;
                }
            }
            Event::Cancel(true) => {
                if *cancel.borrow() && !cancelled {
                    cancelled = true;
                    kill(&mut child, index);
                    // Descendants may keep the pipes open; stop reading.
                    stdout = None;
                    stderr = None;
                }
            }
            Event::Cancel(false) => watching = false,
        }
    }

    // Output closed; the process may still be running.
    let waited = loop {
        if cancelled || !watching {
            break child.wait().await;
        }
        let event = tokio::select! {
            waited = child.wait() => Exit::Done(waited),
            changed = cancel.changed() => Exit::Cancel(changed.is_ok()),
        };
        match event {
            Exit::Done(waited) => break waited,
            Exit::Cancel(true) => {
                if *cancel.borrow() {
                    cancelled = true;
                    kill(&mut child, index);
                }
            }
            Exit::Cancel(false) => watching = false,
        }
    };

    let status = match waited {
        Ok(_) if cancelled => ShardStatus::Cancelled,
        Ok(status) => ShardStatus::Exited(status.code()),
        Err(err) => ShardStatus::WaitFailed(err.to_string()),
    };

    if status.succeeded() {
        info!("Shard {index} finished");
    } else {
        warn!("Shard {index} ended: {status}");
    }
    status
}
