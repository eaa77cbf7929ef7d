//! TOML settings file.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below.
//!
//! ```toml
//! [dataset]
//! dir = "input/fvcom"
//! extension = "nc"
//! format = "netcdf"
//!
//! [integration]
//! dti = 60
//! instp = 3600
//! dtout = 3600
//!
//! [build]
//! source_dir = "integrator"
//! geographic_descriptor = "makefile.geo"
//! projected_descriptor = "makefile.cart"
//! executable = "ptraj"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub dataset: DatasetSettings,
    pub integration: IntegrationSettings,
    pub vertical: VerticalSettings,
    pub random_walk: RandomWalkSettings,
    pub projection: ProjectionSettings,
    pub io: IoSettings,
    pub build: BuildSettings,
    pub run: RunSettings,
    pub log: LogSettings,
}

/// Storage format of the flow-model output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    #[default]
    Netcdf,
    /// Plain-text time listings (see [`crate::dataset`]).
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub dir: PathBuf,
    pub extension: String,
    pub format: DatasetFormat,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("input/fvcom"),
            extension: "nc".to_string(),
            format: DatasetFormat::default(),
        }
    }
}

/// Time-integration parameters of the integrator, in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    /// Internal integration step.
    pub dti: i64,
    /// Interval between flow-field records; the dataset step when unset.
    pub instp: Option<i64>,
    /// Output interval.
    pub dtout: i64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            dti: 60,
            instp: None,
            dtout: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VerticalSettings {
    pub f_depth: bool,
    pub p_sigma: bool,
    pub outsigma: bool,
}

impl Default for VerticalSettings {
    fn default() -> Self {
        Self {
            f_depth: false,
            p_sigma: true,
            outsigma: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RandomWalkSettings {
    /// Random-walk scheme (0 = off).
    pub irw: i64,
    /// Horizontal diffusivity, m^2/s.
    pub dhor: f64,
    /// Random-walk step, s.
    pub dtrw: i64,
}

impl Default for RandomWalkSettings {
    fn default() -> Self {
        Self {
            irw: 0,
            dhor: 0.0,
            dtrw: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    pub projection_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IoSettings {
    /// Directory holding grid files and particle sets.
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub info_file: String,
    /// Working directory of the integrator; run artifacts are written here.
    pub run_dir: PathBuf,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            info_file: "info".to_string(),
            run_dir: PathBuf::from("run"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub source_dir: PathBuf,
    /// Descriptor for geographic (lon/lat) grids, relative to `source_dir`.
    pub geographic_descriptor: PathBuf,
    /// Descriptor for projected (cartesian) grids, relative to `source_dir`.
    pub projected_descriptor: PathBuf,
    /// Key of the flags line inside a descriptor.
    pub flags_key: String,
    /// Token on the flags line that selects backward integration.
    pub inverse_flag: String,
    /// Build tool, invoked as `<program> -f <descriptor> [clean]`.
    pub program: String,
    /// Integrator executable produced by the build, relative to `source_dir`.
    pub executable: PathBuf,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("integrator"),
            geographic_descriptor: PathBuf::from("makefile.geo"),
            projected_descriptor: PathBuf::from("makefile.cart"),
            flags_key: "FLAG_INVERSE".to_string(),
            inverse_flag: "-DINVERSE".to_string(),
            program: "make".to_string(),
            executable: PathBuf::from("ptraj"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Default number of shards when none is requested.
    pub threads: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Settings {
    /// Load and validate a settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let settings = Self::from_toml(&content)
            .map_err(|err| Error::Settings(format!("{}: {err}", path.display())))?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|err| Error::Settings(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.dataset.extension.is_empty() {
            return Err(Error::Settings("dataset.extension must not be empty".into()));
        }
        if self.integration.dti <= 0 {
            return Err(Error::Settings("integration.dti must be positive".into()));
        }
        if self.integration.dtout <= 0 {
            return Err(Error::Settings("integration.dtout must be positive".into()));
        }
        if self.integration.instp.is_some_and(|instp| instp <= 0) {
            return Err(Error::Settings("integration.instp must be positive".into()));
        }
        if self.build.flags_key.trim().is_empty() || self.build.inverse_flag.trim().is_empty() {
            return Err(Error::Settings(
                "build.flags_key and build.inverse_flag must not be empty".into(),
            ));
        }
        if self.run.threads == 0 {
            return Err(Error::Settings("run.threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn executable_path(&self) -> PathBuf {
        self.build.source_dir.join(&self.build.executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml("").expect("defaults are valid");
        assert_eq!(settings.dataset.extension, "nc");
        assert_eq!(settings.integration, IntegrationSettings::default());
        assert_eq!(settings.run.threads, 1);
    }

    #[test]
    fn sections_override_defaults() {
        let settings = Settings::from_toml(
            r#"
            [dataset]
            dir = "data"
            format = "text"
            extension = "times"

            [integration]
            instp = 1800

            [build]
            source_dir = "src/lag"
            "#,
        )
        .expect("valid settings");
        assert_eq!(settings.dataset.format, DatasetFormat::Text);
        assert_eq!(settings.integration.instp, Some(1800));
        assert_eq!(settings.integration.dti, 60);
        assert_eq!(settings.executable_path(), PathBuf::from("src/lag/ptraj"));
    }

    #[test]
    fn rejects_non_positive_steps() {
        let err = Settings::from_toml("[integration]\ndti = 0\n").unwrap_err();
        assert!(err.to_string().contains("dti"));
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(Settings::from_toml("[lagrangian]\nx = 1\n").is_err());
    }
}
