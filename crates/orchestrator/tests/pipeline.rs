//! Full pipeline over a scratch project: text dataset, particle set, a build
//! descriptor built with `true`, and a shell script standing in for the
//! integrator.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use lagrun_orchestrator::time_axis::parse_time_point;
use lagrun_orchestrator::{
    run_pipeline, CoordinateSystem, Direction, Error, RunRequest, Settings,
};
use tempfile::TempDir;

const INTEGRATOR: &str = r#"#!/bin/sh
test -f "$1_run.dat" || { echo "missing $1_run.dat" >&2; exit 4; }
echo "reading $1_run.dat"
echo "6 / 12 finished (hours)"
echo "12 / 12 finished (hours)"
"#;

fn scratch_project(root: &Path) -> Settings {
    let dataset = root.join("fvcom");
    fs::create_dir_all(&dataset).expect("create dataset dir");
    for (name, day) in [("subei_0001.times", "02"), ("subei_0002.times", "03")] {
        let listing: String = (0..24)
            .map(|hour| format!("2025-04-{day} {hour:02}:00:00\n"))
            .collect();
        fs::write(dataset.join(name), listing).expect("write listing");
    }

    let input = root.join("input");
    fs::create_dir_all(&input).expect("create input dir");
    let mut particles = String::from("7\n");
    for id in 1..=7 {
        particles.push_str(&format!("{id} {}.5 34.{id}\n", 119 + id));
    }
    fs::write(input.join("release.dat"), particles).expect("write particles");

    let source = root.join("integrator");
    fs::create_dir_all(&source).expect("create integrator dir");
    fs::write(
        source.join("makefile.geo"),
        "FC = gfortran\nFLAG_INVERSE = -DDOUBLE_PRECISION\n",
    )
    .expect("write descriptor");
    let executable = source.join("ptraj");
    fs::write(&executable, INTEGRATOR).expect("write integrator");
    fs::set_permissions(&executable, fs::Permissions::from_mode(0o755))
        .expect("make integrator executable");

    let mut settings = Settings::from_toml(
        r#"
        [dataset]
        format = "text"
        extension = "times"

        [build]
        program = "true"
        "#,
    )
    .expect("valid settings");
    settings.dataset.dir = dataset;
    settings.io.input_dir = input;
    settings.io.output_dir = root.join("output");
    settings.io.run_dir = root.join("run");
    settings.build.source_dir = source;
    settings
}

fn request(start: &str, end: &str, threads: &str) -> RunRequest {
    RunRequest {
        start_time: parse_time_point(start).expect("valid start"),
        end_time: parse_time_point(end).expect("valid end"),
        coordinates: CoordinateSystem::Geographic,
        case_name: "subei".to_string(),
        geo_area: "subei_grd".to_string(),
        particle_set: "release".to_string(),
        thread_count: threads.to_string(),
        drag_coefficient: Some("0.02".to_string()),
        rotation_angle: None,
    }
}

#[tokio::test]
async fn forward_run_completes_every_shard() {
    let dir = TempDir::new().expect("TempDir should create test directory");
    let settings = scratch_project(dir.path());

    let summary = run_pipeline(
        &settings,
        request("2025-04-02 06:00:00", "2025-04-02 18:00:00", "3"),
        None,
    )
    .await
    .expect("pipeline runs");

    assert_eq!(summary.timeline.len(), 48);
    assert_eq!(summary.config.direction, Direction::Forward);
    assert_eq!(summary.config.step_count, 12);
    assert_eq!(summary.artifacts.len(), 3);
    assert!(summary.report.is_success(), "{:?}", summary.report.outcomes);
    assert_eq!(summary.report.aggregate_percent, 100.0);

    let run_dir = dir.path().join("run");
    for index in 0..3 {
        let artifact = fs::read_to_string(run_dir.join(format!("subei_{index}_run.dat")))
            .expect("shard artifact written");
        assert!(artifact.contains(&format!("LAGINI = 'release_{index}'")));
        assert!(dir
            .path()
            .join(format!("input/release_{index}.dat"))
            .is_file());
    }
    let first = fs::read_to_string(dir.path().join("input/release_0.dat")).expect("shard 0");
    assert!(first.starts_with("3\n1 "));

    let descriptor = fs::read_to_string(dir.path().join("integrator/makefile.geo"))
        .expect("descriptor kept");
    assert!(!descriptor.contains("-DINVERSE"));
}

#[tokio::test]
async fn inverse_run_marks_descriptor() {
    let dir = TempDir::new().expect("TempDir should create test directory");
    let settings = scratch_project(dir.path());

    let summary = run_pipeline(
        &settings,
        request("2025-04-03 12:00:00", "2025-04-03 00:00:00", "1"),
        None,
    )
    .await
    .expect("pipeline runs");

    assert_eq!(summary.config.direction, Direction::Inverse);
    assert_eq!(summary.config.step_count, -12);
    assert!(summary.report.is_success());

    let descriptor = fs::read_to_string(dir.path().join("integrator/makefile.geo"))
        .expect("descriptor kept");
    assert!(descriptor.contains("FLAG_INVERSE = -DDOUBLE_PRECISION -DINVERSE"));
}

#[tokio::test]
async fn window_outside_dataset_aborts_before_sharding() {
    let dir = TempDir::new().expect("TempDir should create test directory");
    let settings = scratch_project(dir.path());

    let err = run_pipeline(
        &settings,
        request("2025-04-03 12:00:00", "2025-04-05 00:00:00", "2"),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::WindowOutOfRange { .. }), "{err}");
    assert!(!dir.path().join("run").exists());
}

#[tokio::test]
async fn failing_integrator_is_reported_not_fatal() {
    let dir = TempDir::new().expect("TempDir should create test directory");
    let settings = scratch_project(dir.path());
    fs::write(
        dir.path().join("integrator/ptraj"),
        "#!/bin/sh\ncase \"$1\" in *_1) exit 5;; esac\necho \"12 / 12 finished\"\n",
    )
    .expect("rewrite integrator");

    let summary = run_pipeline(
        &settings,
        request("2025-04-02 06:00:00", "2025-04-02 18:00:00", "2"),
        None,
    )
    .await
    .expect("pipeline runs");

    let failures = summary.report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].case_id, "subei_1");
    assert_eq!(failures[0].exit_code, Some(5));
}
