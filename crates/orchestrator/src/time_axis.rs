//! Dataset time-axis reconciliation.
//!
//! FVCOM output for one forcing period is usually split over several files.
//! Each file contributes a sequence of time records; this module decodes them,
//! concatenates them in file order and validates the result as one uniformly
//! spaced, gap-free [`Timeline`].

use std::fmt;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// An absolute timestamp on the dataset time axis.
pub type TimePoint = NaiveDateTime;

/// Accepted calendar timestamp layouts, tried in order.
const CALENDAR_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a calendar timestamp (`YYYY-MM-DD HH:MM:SS[.f]`, space or `T`
/// separated). A bare date is read as midnight.
pub fn parse_time_point(text: &str) -> Option<TimePoint> {
    let text = text.trim();
    for format in CALENDAR_FORMATS {
        if let Ok(point) = NaiveDateTime::parse_from_str(text, format) {
            return Some(point);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Unit of a numeric time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl OffsetUnit {
    fn millis(self) -> f64 {
        match self {
            OffsetUnit::Days => 86_400_000.0,
            OffsetUnit::Hours => 3_600_000.0,
            OffsetUnit::Minutes => 60_000.0,
            OffsetUnit::Seconds => 1_000.0,
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "d" => Some(OffsetUnit::Days),
            "hour" | "hours" | "hr" | "hrs" | "h" => Some(OffsetUnit::Hours),
            "minute" | "minutes" | "min" | "mins" => Some(OffsetUnit::Minutes),
            "second" | "seconds" | "sec" | "secs" | "s" => Some(OffsetUnit::Seconds),
            _ => None,
        }
    }
}

/// Epoch used by FVCOM when the units attribute names none (Modified Julian Day).
pub fn fvcom_epoch() -> TimePoint {
    NaiveDate::from_ymd_opt(1858, 11, 17)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// How a file stores its time records.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeEncoding {
    /// Calendar timestamp strings.
    Calendar(Vec<String>),
    /// Numeric offsets from an epoch.
    Offset {
        unit: OffsetUnit,
        epoch: TimePoint,
        values: Vec<f64>,
    },
}

impl TimeEncoding {
    /// Build an offset encoding from a CF-style units string such as
    /// `days since 1858-11-17 00:00:00`.
    ///
    /// A units string without `since` is read as days since the FVCOM epoch.
    pub fn from_units(units: &str, values: Vec<f64>) -> std::result::Result<Self, String> {
        let (unit, epoch) = match units.split_once(" since ") {
            Some((unit, epoch)) => {
                let unit = OffsetUnit::parse(unit)
                    .ok_or_else(|| format!("unsupported time unit '{}'", unit.trim()))?;
                let epoch = parse_time_point(epoch)
                    .ok_or_else(|| format!("unparseable epoch '{}'", epoch.trim()))?;
                (unit, epoch)
            }
            None => (
                OffsetUnit::parse(units).unwrap_or(OffsetUnit::Days),
                fvcom_epoch(),
            ),
        };
        Ok(TimeEncoding::Offset {
            unit,
            epoch,
            values,
        })
    }

    /// Calendar encoding from a fixed-width character array, one timestamp
    /// per `width` bytes (FVCOM `Times`). NUL and blank padding is trimmed.
    pub fn from_char_rows(bytes: &[u8], width: usize) -> Self {
        let rows = bytes
            .chunks(width.max(1))
            .map(|row| {
                String::from_utf8_lossy(row)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string()
            })
            .collect();
        TimeEncoding::Calendar(rows)
    }

    /// Number of raw records.
    pub fn len(&self) -> usize {
        match self {
            TimeEncoding::Calendar(values) => values.len(),
            TimeEncoding::Offset { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw time records of one dataset file.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTimes {
    pub source: PathBuf,
    pub encoding: TimeEncoding,
}

impl DatasetTimes {
    pub fn new(source: impl Into<PathBuf>, encoding: TimeEncoding) -> Self {
        Self {
            source: source.into(),
            encoding,
        }
    }

    /// Decode every record into an absolute time point.
    pub fn decode(&self) -> Result<Vec<TimePoint>> {
        match &self.encoding {
            TimeEncoding::Calendar(values) => values
                .iter()
                .map(|value| {
                    parse_time_point(value).ok_or_else(|| {
                        Error::dataset(&self.source, format!("unparseable timestamp '{value}'"))
                    })
                })
                .collect(),
            TimeEncoding::Offset {
                unit,
                epoch,
                values,
            } => values
                .iter()
                .map(|&value| {
                    let millis = value * unit.millis();
                    // `as` saturates; try_milliseconds rejects the i64::MIN end.
                    Some(millis)
                        .filter(|millis| millis.is_finite())
                        .and_then(|millis| TimeDelta::try_milliseconds(millis.round() as i64))
                        .and_then(|offset| epoch.checked_add_signed(offset))
                        .ok_or_else(|| {
                            Error::dataset(&self.source, format!("time offset {value} out of range"))
                        })
                })
                .collect(),
        }
    }
}

/// Validated, uniformly spaced dataset time axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    points: Vec<TimePoint>,
    step: TimeDelta,
}

impl Timeline {
    pub fn start(&self) -> TimePoint {
        self.points[0]
    }

    pub fn end(&self) -> TimePoint {
        self.points[self.points.len() - 1]
    }

    pub fn step(&self) -> TimeDelta {
        self.step
    }

    /// Sampling step in seconds (fractional for sub-second steps).
    pub fn step_seconds(&self) -> f64 {
        self.step.num_seconds() as f64 + f64::from(self.step.subsec_nanos()) / 1e9
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    /// Whether `point` lies within `[start, end]`.
    pub fn covers(&self, point: TimePoint) -> bool {
        self.start() <= point && point <= self.end()
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {} ({} records, step {}s)",
            self.start(),
            self.end(),
            self.len(),
            self.step_seconds()
        )
    }
}

fn on_whole_hour(point: &TimePoint) -> bool {
    point.minute() == 0 && point.second() == 0 && point.nanosecond() == 0
}

/// Merge per-file time records (already in file-sort order) into a validated
/// [`Timeline`].
pub fn reconcile(files: &[DatasetTimes]) -> Result<Timeline> {
    let mut points = Vec::new();
    let mut owners = Vec::new();
    for (file_index, file) in files.iter().enumerate() {
        let decoded = file.decode()?;
        debug!(
            "{}: {} time records",
            file.source.display(),
            decoded.len()
        );
        owners.extend(std::iter::repeat(file_index).take(decoded.len()));
        points.extend(decoded);
    }

    if points.is_empty() {
        return Err(Error::EmptyTimeline);
    }

    if let Some(index) = (1..points.len()).find(|&i| points[i] <= points[i - 1]) {
        return Err(Error::TimelineOrdering {
            file: files[owners[index]].source.clone(),
            index,
            previous: points[index - 1],
            current: points[index],
        });
    }

    let step = detect_step(&points)?;

    let start = points[0];
    for (index, &found) in points.iter().enumerate() {
        let expected = i32::try_from(index)
            .ok()
            .and_then(|k| step.checked_mul(k))
            .and_then(|offset| start.checked_add_signed(offset));
        match expected {
            Some(expected) if expected == found => {}
            Some(expected) => {
                return Err(Error::TimelineGap {
                    index,
                    expected,
                    found,
                })
            }
            None => {
                return Err(Error::TimelineGap {
                    index,
                    expected: NaiveDateTime::MAX,
                    found,
                })
            }
        }
    }

    let timeline = Timeline { points, step };
    info!("Dataset time axis: {timeline}");
    Ok(timeline)
}

/// Step between the first two successive whole-hour records, divided by the
/// number of records separating them.
fn detect_step(points: &[TimePoint]) -> Result<TimeDelta> {
    let mut boundaries = points
        .iter()
        .enumerate()
        .filter(|(_, point)| on_whole_hour(point));

    let first = boundaries.next();
    let second = boundaries.next();
    match (first, second) {
        (Some((i, a)), Some((j, b))) => {
            let span = *b - *a;
            let records = i32::try_from(j - i).unwrap_or(i32::MAX);
            Ok(span / records)
        }
        (first, _) => Err(Error::StepDetection {
            boundaries: usize::from(first.is_some()),
        }),
    }
}
