//! Lagrun orchestrator
//!
//! Prepares and supervises offline Lagrangian particle-tracking runs over
//! FVCOM flow-field output: reconciles the dataset time axis, derives the run
//! configuration, shards the particle set, builds the integrator, and runs one
//! integrator process per shard while aggregating their progress.

pub mod build;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod particles;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod run_config;
pub mod settings;
pub mod time_axis;

pub use error::{Error, Result};
pub use executor::{Coordinator, ExecutionReport, ShardFailure};
pub use launcher::{IntegratorLauncher, ShardLauncher};
pub use pipeline::{run_pipeline, RunSummary};
pub use run_config::{CoordinateSystem, Direction, RunConfiguration, RunRequest, RunWindow};
pub use settings::Settings;
pub use time_axis::{reconcile, Timeline};
