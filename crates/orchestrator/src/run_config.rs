//! Run configuration derivation and the integrator's run artifact.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::settings::{
    IntegrationSettings, ProjectionSettings, RandomWalkSettings, Settings, VerticalSettings,
};
use crate::time_axis::{TimePoint, Timeline};

/// Integration direction relative to the run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Tracking: forward in time.
    Forward,
    /// Backtracking: backward in time.
    Inverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Inverse => write!(f, "inverse"),
        }
    }
}

/// Horizontal coordinate system of the flow-field grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSystem {
    /// Spherical lon/lat.
    #[default]
    Geographic,
    /// Projected cartesian x/y.
    Projected,
}

impl CoordinateSystem {
    pub fn is_projected(self) -> bool {
        matches!(self, CoordinateSystem::Projected)
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateSystem::Geographic => write!(f, "geographic"),
            CoordinateSystem::Projected => write!(f, "projected"),
        }
    }
}

/// Requested tracking window. Bounds are never equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    start: TimePoint,
    end: TimePoint,
}

impl RunWindow {
    pub fn new(start: TimePoint, end: TimePoint) -> Result<Self> {
        if start == end {
            return Err(Error::EqualBounds { bound: start });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> TimePoint {
        self.start
    }

    pub fn end(&self) -> TimePoint {
        self.end
    }

    pub fn direction(&self) -> Direction {
        if self.start < self.end {
            Direction::Forward
        } else {
            Direction::Inverse
        }
    }

    /// Whole hours between the bounds, regardless of direction.
    pub fn elapsed_hours(&self) -> i64 {
        (self.end - self.start).num_seconds().abs() / 3600
    }
}

/// Caller-supplied run parameters, numeric fields still in text form.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub coordinates: CoordinateSystem,
    pub case_name: String,
    pub geo_area: String,
    /// Particle-set identifier (`LAGINI`), the particle file stem.
    pub particle_set: String,
    pub thread_count: String,
    pub drag_coefficient: Option<String>,
    pub rotation_angle: Option<String>,
}

/// Input/output locations written to the run artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct IoPaths {
    pub input_dir: PathBuf,
    pub geo_area: String,
    pub output_dir: PathBuf,
    pub info_file: String,
    pub particle_set: String,
}

/// Validated configuration of one integrator run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub case_name: String,
    pub window: RunWindow,
    pub direction: Direction,
    /// Sampling step of the dataset time axis.
    pub flow_step_seconds: f64,
    pub instrument_step_seconds: i64,
    /// Number of instrument steps to integrate; negative when inverse.
    pub step_count: i64,
    pub coordinates: CoordinateSystem,
    pub thread_count: usize,
    pub drag_coefficient: Option<f64>,
    pub rotation_angle: Option<f64>,
    pub io: IoPaths,
    pub integration: IntegrationSettings,
    pub vertical: VerticalSettings,
    pub random_walk: RandomWalkSettings,
    pub projection: ProjectionSettings,
}

fn parse_thread_count(value: &str) -> Result<usize> {
    let count = value.trim().parse::<usize>().map_err(|err| Error::ConfigField {
        field: "thread_count",
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if count == 0 {
        return Err(Error::ConfigField {
            field: "thread_count",
            value: value.to_string(),
            reason: "at least one thread is required".to_string(),
        });
    }
    Ok(count)
}

/// Parse an optional numeric field; malformed values are logged and dropped.
fn parse_optional(field: &'static str, value: Option<&str>) -> Option<f64> {
    let value = value?.trim();
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(parsed),
        Ok(_) => {
            error!("Ignoring {field} = '{value}': not a finite number");
            None
        }
        Err(err) => {
            error!("Ignoring {field} = '{value}': {err}");
            None
        }
    }
}

impl RunConfiguration {
    /// Derive the run configuration for `request` over `timeline`.
    pub fn build(request: &RunRequest, timeline: &Timeline, settings: &Settings) -> Result<Self> {
        let window = RunWindow::new(request.start_time, request.end_time)?;

        if !timeline.covers(window.start()) || !timeline.covers(window.end()) {
            return Err(Error::WindowOutOfRange {
                start: window.start(),
                end: window.end(),
                timeline_start: timeline.start(),
                timeline_end: timeline.end(),
            });
        }

        let thread_count = parse_thread_count(&request.thread_count)?;
        let drag_coefficient =
            parse_optional("drag_coefficient", request.drag_coefficient.as_deref());
        let rotation_angle = parse_optional("rotation_angle", request.rotation_angle.as_deref());

        let instrument_step_seconds = match settings.integration.instp {
            Some(instp) => instp,
            None => {
                let step = timeline.step();
                if step.subsec_nanos() != 0 {
                    return Err(Error::ConfigField {
                        field: "instp",
                        value: format!("{}s", timeline.step_seconds()),
                        reason: "dataset step is not a whole number of seconds; set [integration] instp"
                            .to_string(),
                    });
                }
                step.num_seconds()
            }
        };
        if instrument_step_seconds <= 0 {
            return Err(Error::ConfigField {
                field: "instp",
                value: instrument_step_seconds.to_string(),
                reason: "instrument step must be a positive number of seconds".to_string(),
            });
        }

        let direction = window.direction();
        let hours = window.elapsed_hours();
        let magnitude = hours * 3600 / instrument_step_seconds;
        let step_count = match direction {
            Direction::Forward => magnitude,
            Direction::Inverse => -magnitude,
        };

        info!(
            "Run window {} -> {}: {direction}, {hours} h, {step_count} steps of {instrument_step_seconds}s",
            window.start(),
            window.end()
        );

        Ok(Self {
            case_name: request.case_name.clone(),
            window,
            direction,
            flow_step_seconds: timeline.step_seconds(),
            instrument_step_seconds,
            step_count,
            coordinates: request.coordinates,
            thread_count,
            drag_coefficient,
            rotation_angle,
            io: IoPaths {
                input_dir: settings.io.input_dir.clone(),
                geo_area: request.geo_area.clone(),
                output_dir: settings.io.output_dir.clone(),
                info_file: settings.io.info_file.clone(),
                particle_set: request.particle_set.clone(),
            },
            integration: settings.integration.clone(),
            vertical: settings.vertical.clone(),
            random_walk: settings.random_walk.clone(),
            projection: settings.projection.clone(),
        })
    }

    /// Configuration for shard `index`: case name and particle set suffixed
    /// with the index so shards never share input or output paths.
    pub fn for_shard(&self, index: usize) -> Self {
        let mut shard = self.clone();
        shard.case_name = format!("{}_{index}", self.case_name);
        shard.io.particle_set = format!("{}_{index}", self.io.particle_set);
        shard
    }

    /// File name of the run artifact, `<case>_run.dat`.
    pub fn artifact_name(&self) -> String {
        format!("{}_run.dat", self.case_name)
    }

    /// Path of this configuration's particle file under `particle_dir`.
    pub fn particle_file(&self, particle_dir: &Path) -> PathBuf {
        particle_dir.join(format!("{}.dat", self.io.particle_set))
    }

    /// Named entries of the run artifact, grouped by section.
    pub fn entries(&self) -> IndexMap<&'static str, IndexMap<&'static str, Value>> {
        let start = self.window.start();
        let mut sections = IndexMap::new();

        let mut general = IndexMap::new();
        general.insert("CASENAME", Value::Text(self.case_name.clone()));
        general.insert("INVERSE", Value::Bool(self.direction == Direction::Inverse));
        if let Some(drag) = self.drag_coefficient {
            general.insert("DRAG_COEFFICIENT", Value::Real(drag));
        }
        if let Some(angle) = self.rotation_angle {
            general.insert("ROTATION_ANGLE", Value::Real(angle));
        }
        sections.insert("NML_GENERAL", general);

        sections.insert(
            "NML_TIME_INTEGRATION",
            IndexMap::from([
                ("DTI", Value::Int(self.integration.dti)),
                ("INSTP", Value::Int(self.instrument_step_seconds)),
                ("DTOUT", Value::Int(self.integration.dtout)),
                ("TDRIFT", Value::Int(self.step_count)),
            ]),
        );
        sections.insert(
            "NML_START_TIME",
            IndexMap::from([
                ("YEARLAG", Value::Int(i64::from(start.year()))),
                ("MONTHLAG", Value::Int(i64::from(start.month()))),
                ("DAYLAG", Value::Int(i64::from(start.day()))),
                ("HOURLAG", Value::Int(i64::from(start.hour()))),
            ]),
        );
        sections.insert(
            "NML_IO_LOCATION",
            IndexMap::from([
                ("INPDIR", Value::Text(self.io.input_dir.display().to_string())),
                ("GEOAREA", Value::Text(self.io.geo_area.clone())),
                ("OUTDIR", Value::Text(self.io.output_dir.display().to_string())),
                ("INFOFILE", Value::Text(self.io.info_file.clone())),
                ("LAGINI", Value::Text(self.io.particle_set.clone())),
            ]),
        );
        sections.insert(
            "NML_SIGMA_OR_CARTESIAN",
            IndexMap::from([
                ("F_DEPTH", Value::Bool(self.vertical.f_depth)),
                ("P_SIGMA", Value::Bool(self.vertical.p_sigma)),
                ("OUTSIGMA", Value::Bool(self.vertical.outsigma)),
            ]),
        );
        sections.insert(
            "NML_RANDOM_WALK",
            IndexMap::from([
                ("IRW", Value::Int(self.random_walk.irw)),
                ("DHOR", Value::Real(self.random_walk.dhor)),
                ("DTRW", Value::Int(self.random_walk.dtrw)),
            ]),
        );
        sections.insert(
            "NML_PROJECTION_CONTROL",
            IndexMap::from([
                ("CART_SHP", Value::Bool(self.coordinates.is_projected())),
                (
                    "PROJECTION_REFERENCE",
                    Value::Text(self.projection.projection_reference.clone()),
                ),
            ]),
        );

        sections
    }

    /// Render the run artifact as namelist groups of `KEY = value` entries.
    pub fn to_artifact(&self) -> String {
        let mut out = String::new();
        for (section, entries) in self.entries() {
            out.push_str(&format!(" &{section}\n"));
            for (key, value) in entries {
                out.push_str(&format!(" {key} = {value},\n"));
            }
            out.push_str(" /\n\n");
        }
        out
    }

    /// Write the run artifact into `dir`, returning its path.
    pub fn write_artifact(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
        let path = dir.join(self.artifact_name());
        fs::write(&path, self.to_artifact()).map_err(|err| Error::io(&path, err))?;
        Ok(path)
    }
}

/// A single artifact value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v:?}"),
            Value::Bool(true) => write!(f, "T"),
            Value::Bool(false) => write!(f, "F"),
            Value::Text(v) => write!(f, "'{v}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_axis::{parse_time_point, reconcile, DatasetTimes, TimeEncoding};
    use chrono::TimeDelta;

    fn at(text: &str) -> TimePoint {
        parse_time_point(text).expect("valid timestamp")
    }

    /// 2025-04-02T00:00 .. 2025-04-03T23:00, hourly.
    fn two_days() -> Timeline {
        let start = at("2025-04-02 00:00:00");
        let values = (0..48)
            .map(|k| (start + TimeDelta::hours(k)).to_string())
            .collect();
        reconcile(&[DatasetTimes::new("a.nc", TimeEncoding::Calendar(values))])
            .expect("hourly axis")
    }

    fn request(start: &str, end: &str) -> RunRequest {
        RunRequest {
            start_time: at(start),
            end_time: at(end),
            coordinates: CoordinateSystem::Geographic,
            case_name: "tst".to_string(),
            geo_area: "subei".to_string(),
            particle_set: "particle".to_string(),
            thread_count: "4".to_string(),
            drag_coefficient: None,
            rotation_angle: None,
        }
    }

    #[test]
    fn forward_day_is_24_hourly_steps() {
        let config = RunConfiguration::build(
            &request("2025-04-02 06:00:00", "2025-04-03 06:00:00"),
            &two_days(),
            &Settings::default(),
        )
        .expect("valid window");

        assert_eq!(config.direction, Direction::Forward);
        assert_eq!(config.instrument_step_seconds, 3600);
        assert_eq!(config.step_count, 24);
        assert_eq!(config.flow_step_seconds, 3600.0);
        assert_eq!(config.thread_count, 4);
    }

    #[test]
    fn inverse_window_negates_step_count() {
        let config = RunConfiguration::build(
            &request("2025-04-03 18:00:00", "2025-04-03 06:00:00"),
            &two_days(),
            &Settings::default(),
        )
        .expect("valid window");

        assert_eq!(config.direction, Direction::Inverse);
        assert_eq!(config.step_count, -12);
    }

    #[test]
    fn configured_instrument_step_scales_count() {
        let mut settings = Settings::default();
        settings.integration.instp = Some(1800);
        let config = RunConfiguration::build(
            &request("2025-04-02 06:00:00", "2025-04-03 06:00:00"),
            &two_days(),
            &settings,
        )
        .expect("valid window");
        assert_eq!(config.step_count, 48);
    }

    #[test]
    fn sub_second_dataset_step_needs_explicit_instp() {
        let values = (0..=7200).map(|k| f64::from(k) * 0.5).collect();
        let encoding = TimeEncoding::from_units("seconds since 2025-04-02 00:00:00", values)
            .expect("cf units");
        let timeline =
            reconcile(&[DatasetTimes::new("a.nc", encoding)]).expect("half-second axis");
        assert_eq!(timeline.step_seconds(), 0.5);

        let window = request("2025-04-02 00:00:00", "2025-04-02 01:00:00");
        let err = RunConfiguration::build(&window, &timeline, &Settings::default()).unwrap_err();
        match err {
            Error::ConfigField { field, value, reason } => {
                assert_eq!(field, "instp");
                assert_eq!(value, "0.5s");
                assert!(reason.contains("whole number of seconds"));
            }
            other => panic!("expected config field error, got {other:?}"),
        }

        let mut settings = Settings::default();
        settings.integration.instp = Some(1);
        let config = RunConfiguration::build(&window, &timeline, &settings).expect("explicit instp");
        assert_eq!(config.step_count, 3600);
        assert_eq!(config.flow_step_seconds, 0.5);
    }

    #[test]
    fn equal_bounds_rejected() {
        let err = RunConfiguration::build(
            &request("2025-04-02 06:00:00", "2025-04-02 06:00:00"),
            &two_days(),
            &Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EqualBounds { .. }));
    }

    #[test]
    fn window_outside_timeline_rejected() {
        for (start, end) in [
            ("2025-04-01 23:00:00", "2025-04-02 06:00:00"),
            ("2025-04-02 06:00:00", "2025-04-04 00:00:00"),
            ("2025-04-04 00:00:00", "2025-04-02 06:00:00"),
        ] {
            let err = RunConfiguration::build(&request(start, end), &two_days(), &Settings::default())
                .unwrap_err();
            assert!(matches!(err, Error::WindowOutOfRange { .. }), "{start} -> {end}");
        }
    }

    #[test]
    fn window_may_touch_timeline_ends() {
        let config = RunConfiguration::build(
            &request("2025-04-03 23:00:00", "2025-04-02 00:00:00"),
            &two_days(),
            &Settings::default(),
        )
        .expect("bounds are inclusive");
        assert_eq!(config.step_count, -47);
    }

    #[test]
    fn malformed_optional_fields_are_omitted() {
        let mut req = request("2025-04-02 06:00:00", "2025-04-03 06:00:00");
        req.drag_coefficient = Some("0.0025".to_string());
        req.rotation_angle = Some("north-ish".to_string());
        let config = RunConfiguration::build(&req, &two_days(), &Settings::default())
            .expect("optional fields are not fatal");

        assert_eq!(config.drag_coefficient, Some(0.0025));
        assert_eq!(config.rotation_angle, None);
        let artifact = config.to_artifact();
        assert!(artifact.contains("DRAG_COEFFICIENT = 0.0025,"));
        assert!(!artifact.contains("ROTATION_ANGLE"));
    }

    #[test]
    fn malformed_thread_count_is_fatal() {
        for threads in ["four", "0", "-2", ""] {
            let mut req = request("2025-04-02 06:00:00", "2025-04-03 06:00:00");
            req.thread_count = threads.to_string();
            let err = RunConfiguration::build(&req, &two_days(), &Settings::default()).unwrap_err();
            assert!(
                matches!(err, Error::ConfigField { field: "thread_count", .. }),
                "thread count '{threads}'"
            );
        }
    }

    #[test]
    fn shard_config_suffixes_identifiers() {
        let config = RunConfiguration::build(
            &request("2025-04-02 06:00:00", "2025-04-03 06:00:00"),
            &two_days(),
            &Settings::default(),
        )
        .expect("valid window");
        let shard = config.for_shard(3);

        assert_eq!(shard.case_name, "tst_3");
        assert_eq!(shard.io.particle_set, "particle_3");
        assert_eq!(shard.artifact_name(), "tst_3_run.dat");
        assert_eq!(shard.step_count, config.step_count);
    }

    #[test]
    fn artifact_carries_start_time_and_flags() {
        let mut req = request("2025-04-03 18:00:00", "2025-04-03 06:00:00");
        req.coordinates = CoordinateSystem::Projected;
        let artifact = RunConfiguration::build(&req, &two_days(), &Settings::default())
            .expect("valid window")
            .to_artifact();

        for line in [
            " &NML_TIME_INTEGRATION",
            " TDRIFT = -12,",
            " YEARLAG = 2025,",
            " MONTHLAG = 4,",
            " DAYLAG = 3,",
            " HOURLAG = 18,",
            " INVERSE = T,",
            " CART_SHP = T,",
            " LAGINI = 'particle',",
            " GEOAREA = 'subei',",
        ] {
            assert!(artifact.contains(line), "missing {line:?} in\n{artifact}");
        }
    }
}
