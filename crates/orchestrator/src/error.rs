//! Orchestrator errors

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal orchestration errors.
///
/// Every variant aborts the run before (or instead of) launching shard
/// processes. Failures of individual shard processes are not errors; they are
/// reported as [`crate::executor::ShardFailure`] values.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset {}: {message}", path.display())]
    Dataset { path: PathBuf, message: String },

    #[error("no dataset files with extension '{extension}' in {}", dir.display())]
    NoDatasetFiles { dir: PathBuf, extension: String },

    #[error("dataset time axis is empty")]
    EmptyTimeline,

    #[error(
        "time axis not strictly ascending at index {index} ({}): {previous} followed by {current}",
        file.display()
    )]
    TimelineOrdering {
        file: PathBuf,
        index: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("cannot detect time step: found {boundaries} whole-hour record(s), need at least 2")]
    StepDetection { boundaries: usize },

    #[error("time axis gap at index {index}: expected {expected}, found {found}")]
    TimelineGap {
        index: usize,
        expected: NaiveDateTime,
        found: NaiveDateTime,
    },

    #[error("run window start and end are both {bound}")]
    EqualBounds { bound: NaiveDateTime },

    #[error(
        "run window {start} -> {end} lies outside the dataset time axis [{timeline_start}, {timeline_end}]"
    )]
    WindowOutOfRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
        timeline_start: NaiveDateTime,
        timeline_end: NaiveDateTime,
    },

    #[error("invalid value '{value}' for {field}: {reason}")]
    ConfigField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("particle set is empty, nothing to shard")]
    EmptyInput,

    #[error("particle file {} line {line}: {message}", path.display())]
    ParticleFile {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("build descriptor {}: {message}", path.display())]
    BuildDescriptor { path: PathBuf, message: String },

    #[error("integrator build step '{step}' failed for {} ({})", descriptor.display(), describe_status(*status))]
    Build {
        step: &'static str,
        descriptor: PathBuf,
        status: Option<i32>,
    },

    #[error("settings: {0}")]
    Settings(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dataset(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Dataset {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Human-readable rendering of an optional process exit code.
pub fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}
