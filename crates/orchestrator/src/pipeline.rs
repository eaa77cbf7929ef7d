//! End-to-end run: dataset to finished shards.
//!
//! Stages run strictly in order and any error before execution aborts the
//! run. Shard failures during execution are not errors here; they are
//! reported in [`RunSummary::report`].

use std::path::{Path, PathBuf};

use tracing::info;

use crate::build::BuildPlan;
use crate::dataset::{read_dataset, TextTimeSource, TimeSource};
use crate::error::{Error, Result};
use crate::executor::{Coordinator, ExecutionReport, ShardJob};
use crate::launcher::IntegratorLauncher;
use crate::particles::read_particles;
use crate::partition::{materialize, partition, ShardArtifacts};
use crate::run_config::{RunConfiguration, RunRequest};
use crate::settings::{DatasetFormat, Settings};
use crate::time_axis::{reconcile, Timeline};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub timeline: Timeline,
    pub config: RunConfiguration,
    pub artifacts: Vec<ShardArtifacts>,
    pub executable: PathBuf,
    pub report: ExecutionReport,
}

fn time_source(format: DatasetFormat) -> Result<Box<dyn TimeSource>> {
    match format {
        DatasetFormat::Text => Ok(Box::new(TextTimeSource)),
        #[cfg(feature = "netcdf")]
        DatasetFormat::Netcdf => Ok(Box::new(crate::dataset::NetcdfTimeSource)),
        #[cfg(not(feature = "netcdf"))]
        DatasetFormat::Netcdf => Err(Error::Settings(
            "dataset.format = \"netcdf\" requires the `netcdf` feature; rebuild with it or use format = \"text\"".into(),
        )),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|err| Error::io(path, err))
}

/// Reconcile the dataset, configure, shard, build and run.
///
/// `particle_file` overrides the default `<input_dir>/<particle_set>.dat`.
pub async fn run_pipeline(
    settings: &Settings,
    request: RunRequest,
    particle_file: Option<PathBuf>,
) -> Result<RunSummary> {
    let source = time_source(settings.dataset.format)?;
    let files = read_dataset(
        source.as_ref(),
        &settings.dataset.dir,
        &settings.dataset.extension,
    )?;
    let timeline = reconcile(&files)?;

    let config = RunConfiguration::build(&request, &timeline, settings)?;

    let particle_file =
        particle_file.unwrap_or_else(|| config.particle_file(&settings.io.input_dir));
    let particles = read_particles(&particle_file)?;
    info!(
        "Loaded {} particle(s) from {}",
        particles.len(),
        particle_file.display()
    );

    let shards = partition(&particles, &config)?;
    let artifacts = materialize(&shards, &settings.io.input_dir, &settings.io.run_dir)?;

    let plan = BuildPlan::from_settings(settings, config.coordinates);
    let executable = absolute(&plan.run(config.direction).await?)?;

    let run_dir = absolute(&settings.io.run_dir)?;
    let jobs = shards.iter().map(ShardJob::from).collect();
    let report = Coordinator::new(IntegratorLauncher::new(&executable, run_dir))
        .run(jobs)
        .await;

    Ok(RunSummary {
        timeline,
        config,
        artifacts,
        executable,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn netcdf_format_needs_feature() {
        let err = time_source(DatasetFormat::Netcdf).err().expect("netcdf rejected");
        assert!(err.to_string().contains("netcdf"));
    }

    #[test]
    fn text_format_is_always_available() {
        assert!(time_source(DatasetFormat::Text).is_ok());
    }
}
