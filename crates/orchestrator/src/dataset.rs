//! Dataset discovery and time-record extraction.
//!
//! A dataset is a directory of flow-model output files. Files are taken in
//! file-name order, which for FVCOM output (`<case>_0001.nc`, `<case>_0002.nc`,
//! ...) is also chronological order.
//!
//! # Text time listings
//!
//! ```text
//! # exported from fvcom_0001.nc
//! units: days since 1858-11-17 00:00:00
//! 60767.0
//! 60767.041666666664
//! ```
//!
//! Without a `units:` header every line is a calendar timestamp
//! (`2025-04-02 00:00:00`).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::time_axis::{DatasetTimes, TimeEncoding};

/// Extracts the raw time records of one dataset file.
pub trait TimeSource: Send + Sync {
    fn read_times(&self, path: &Path) -> Result<DatasetTimes>;
}

/// Plain-text time listing, one record per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTimeSource;

impl TimeSource for TextTimeSource {
    fn read_times(&self, path: &Path) -> Result<DatasetTimes> {
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let mut units = None;
        let mut records = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("units:") {
                units = Some(rest.trim().to_string());
                continue;
            }
            records.push(line.to_string());
        }

        let encoding = match units {
            Some(units) => {
                let values = records
                    .iter()
                    .map(|record| {
                        record.parse::<f64>().map_err(|_| {
                            Error::dataset(path, format!("non-numeric time offset '{record}'"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                TimeEncoding::from_units(&units, values)
                    .map_err(|message| Error::dataset(path, message))?
            }
            None => TimeEncoding::Calendar(records),
        };

        Ok(DatasetTimes::new(path, encoding))
    }
}

/// NetCDF reader for FVCOM output files.
#[cfg(feature = "netcdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfTimeSource;

#[cfg(feature = "netcdf")]
impl NetcdfTimeSource {
    /// Candidate time variables, in lookup order. `Times` holds date strings.
    const TIME_VARIABLES: [&'static str; 5] = ["time", "Time", "Times", "itime", "itime2"];
}

#[cfg(feature = "netcdf")]
impl TimeSource for NetcdfTimeSource {
    fn read_times(&self, path: &Path) -> Result<DatasetTimes> {
        let file = netcdf::open(path).map_err(|err| Error::dataset(path, err.to_string()))?;

        let (name, var) = Self::TIME_VARIABLES
            .iter()
            .find_map(|name| file.variable(name).map(|var| (*name, var)))
            .ok_or_else(|| {
                Error::dataset(
                    path,
                    format!("no time variable (tried {})", Self::TIME_VARIABLES.join(", ")),
                )
            })?;

        if matches!(var.vartype(), netcdf::types::NcVariableType::Char) {
            let width = var.dimensions().last().map_or(1, |dim| dim.len());
            let bytes = var
                .get_raw_values(..)
                .map_err(|err| Error::dataset(path, format!("reading '{name}': {err}")))?;
            debug!("{}: time variable '{name}' as {width}-character dates", path.display());
            return Ok(DatasetTimes::new(
                path,
                TimeEncoding::from_char_rows(&bytes, width),
            ));
        }

        let values: Vec<f64> = var
            .get_values(..)
            .map_err(|err| Error::dataset(path, format!("reading '{name}': {err}")))?;

        let units = var
            .attribute_value("units")
            .and_then(|value| value.ok())
            .and_then(|value| match value {
                netcdf::AttributeValue::Str(units) => Some(units),
                _ => None,
            })
            .unwrap_or_else(|| "days".to_string());

        debug!("{}: time variable '{name}' in '{units}'", path.display());
        let encoding =
            TimeEncoding::from_units(&units, values).map_err(|message| Error::dataset(path, message))?;
        Ok(DatasetTimes::new(path, encoding))
    }
}

/// List dataset files with `extension` in `dir`, sorted by file name.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(Error::NoDatasetFiles {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!("Found {} dataset file(s) in {}", files.len(), dir.display());
    Ok(files)
}

/// Read the time records of every dataset file in `dir`, in file-sort order.
pub fn read_dataset(
    source: &dyn TimeSource,
    dir: &Path,
    extension: &str,
) -> Result<Vec<DatasetTimes>> {
    discover(dir, extension)?
        .iter()
        .map(|path| {
            let times = source.read_times(path)?;
            debug!("{} opened ({} records)", path.display(), times.encoding.len());
            Ok(times)
        })
        .collect()
}
