//! Lagrun - offline Lagrangian tracking and backtracking driver
//!
//! Reconciles the FVCOM dataset time axis, writes one run configuration and
//! particle file per shard, builds the integrator for the run direction, and
//! supervises one integrator process per shard.
//!
//! Exit status is 0 when every shard finished, 1 on a fatal error, 2 when
//! some shards failed.

mod logging;

use std::path::PathBuf;

use clap::Parser;
use lagrun_orchestrator::time_axis::{parse_time_point, TimePoint};
use lagrun_orchestrator::{run_pipeline, CoordinateSystem, RunRequest, Settings};
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "lagrun.toml";

#[derive(Parser, Debug)]
#[command(name = "lagrun")]
#[command(about = "Run offline Lagrangian particle tracking over FVCOM output")]
struct Cli {
    /// Settings file (TOML); `lagrun.toml` is used when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level, overrides `[log] level`
    #[arg(long)]
    log_level: Option<String>,

    /// Log file, overrides `[log] file`
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Release time, e.g. "2025-04-02 06:00:00"
    #[arg(long, value_parser = parse_time_arg)]
    start_time: TimePoint,

    /// End of tracking; earlier than the start for backtracking
    #[arg(long, value_parser = parse_time_arg)]
    end_time: TimePoint,

    /// Grid identifier (GEOAREA)
    #[arg(long)]
    geo_area: String,

    /// Case name; shard cases are `<case>_<index>`
    #[arg(long)]
    case_name: String,

    /// Particle set identifier (LAGINI), the particle file stem
    #[arg(long)]
    lagini: String,

    /// Grid uses projected (cartesian) coordinates instead of lon/lat
    #[arg(long)]
    projected: bool,

    /// Number of shards to run in parallel, defaults to `[run] threads`
    #[arg(long)]
    threads: Option<String>,

    #[arg(long)]
    drag_coefficient: Option<String>,

    #[arg(long)]
    rotation_angle: Option<String>,

    /// Particle file, defaults to `<input_dir>/<lagini>.dat`
    #[arg(long)]
    particles: Option<PathBuf>,
}

fn parse_time_arg(value: &str) -> Result<TimePoint, String> {
    parse_time_point(value).ok_or_else(|| format!("unrecognized time '{value}'"))
}

fn load_settings(path: Option<&PathBuf>) -> lagrun_orchestrator::Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path),
        None if PathBuf::from(DEFAULT_CONFIG).is_file() => Settings::from_file(DEFAULT_CONFIG),
        None => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("lagrun: {e}");
            std::process::exit(1);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&settings.log.level);
    let log_file = cli.log_file.as_deref().or(settings.log.file.as_deref());
    if let Err(e) = logging::init_logging(level, log_file) {
        eprintln!("lagrun: {e}");
        std::process::exit(1);
    }

    let coordinates = if cli.projected {
        CoordinateSystem::Projected
    } else {
        CoordinateSystem::Geographic
    };
    let request = RunRequest {
        start_time: cli.start_time,
        end_time: cli.end_time,
        coordinates,
        case_name: cli.case_name,
        geo_area: cli.geo_area,
        particle_set: cli.lagini,
        thread_count: cli
            .threads
            .unwrap_or_else(|| settings.run.threads.to_string()),
        drag_coefficient: cli.drag_coefficient,
        rotation_angle: cli.rotation_angle,
    };

    info!(
        "Case {} on {} ({coordinates}): {} -> {}",
        request.case_name, request.geo_area, request.start_time, request.end_time
    );

    let summary = match run_pipeline(&settings, request, cli.particles).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let failures = summary.report.failures();
    if !failures.is_empty() {
        warn!(
            "{} of {} shard(s) failed, overall progress {:.1}%",
            failures.len(),
            summary.report.outcomes.len(),
            summary.report.aggregate_percent
        );
        for failure in &failures {
            error!("{failure}");
        }
        std::process::exit(2);
    }

    info!(
        "Run {} complete: {} shard(s), {} steps",
        summary.config.case_name,
        summary.artifacts.len(),
        summary.config.step_count
    );
}
