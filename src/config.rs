// ⚙️ Pipeline Configuration
// Loaded from TOML; every field has a default so an empty file is valid.
// Artifact paths are derived from `base_path`, never configured one by one.

use crate::columns::MERGE_DATE;
use crate::error::{PipelineError, Result};
use crate::sources::SourceKind;
use crate::storage::TableFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "sentinel.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_path: PathBuf,
    /// Format of every artifact the pipeline writes
    pub format: TableFormat,
    pub inputs: InputConfig,
    pub window: WindowConfig,
}

/// Raw extract file names, relative to `<base_path>/raw` unless absolute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub crash: PathBuf,
    pub person: PathBuf,
    pub vehicle: PathBuf,
    pub weather: PathBuf,
}

/// The default column is `merge_date`, the step-1 join key: every integrated
/// row carries it, while `crash_date` is null for rows without a crash match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub date_column: String,
    pub years: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            base_path: PathBuf::from("data"),
            format: TableFormat::Parquet,
            inputs: InputConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            crash: PathBuf::from("crashes.csv"),
            person: PathBuf::from("person.csv"),
            vehicle: PathBuf::from("vehicles.csv"),
            weather: PathBuf::from("weather.csv"),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            date_column: MERGE_DATE.to_string(),
            years: 5,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or from `sentinel.toml` if present, or fall back to defaults.
    /// An explicitly named file that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(PipelineError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
            return Ok(PipelineConfig::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.years == 0 {
            return Err(PipelineError::Config("window.years must be at least 1".into()));
        }
        if i32::try_from(self.window.years).is_err() {
            return Err(PipelineError::Config(format!(
                "window.years must be at most {}, got {}",
                i32::MAX,
                self.window.years
            )));
        }
        if self.window.date_column.trim().is_empty() {
            return Err(PipelineError::Config("window.date_column must not be empty".into()));
        }
        for kind in SourceKind::ALL {
            TableFormat::from_path(&self.input_path(kind))?;
        }
        Ok(())
    }

    // ============ PATHS ============

    pub fn raw_dir(&self) -> PathBuf {
        self.base_path.join("raw")
    }

    pub fn conditioning_dir(&self) -> PathBuf {
        self.base_path.join("conditioning")
    }

    pub fn integrated_dir(&self) -> PathBuf {
        self.base_path.join("integrated")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base_path.join("reports")
    }

    pub fn input_path(&self, kind: SourceKind) -> PathBuf {
        let name = match kind {
            SourceKind::Crash => &self.inputs.crash,
            SourceKind::Person => &self.inputs.person,
            SourceKind::Vehicle => &self.inputs.vehicle,
            SourceKind::Weather => &self.inputs.weather,
        };
        if name.is_absolute() {
            name.clone()
        } else {
            self.raw_dir().join(name)
        }
    }

    pub fn pre_conditioning_path(&self, kind: SourceKind) -> PathBuf {
        self.conditioning_dir()
            .join(format!("{}_PRE_conditioning.{}", kind.name(), self.format.extension()))
    }

    pub fn post_conditioning_path(&self, kind: SourceKind) -> PathBuf {
        self.conditioning_dir()
            .join(format!("{}_POST_conditioning.{}", kind.name(), self.format.extension()))
    }

    pub fn integrated_path(&self) -> PathBuf {
        self.integrated_dir()
            .join(format!("collisions_integrated.{}", self.format.extension()))
    }

    /// Delimited-text mirror of the integrated table
    pub fn integrated_csv_path(&self) -> PathBuf {
        self.integrated_dir().join("collisions_integrated.csv")
    }

    pub fn severity_path(&self) -> PathBuf {
        self.integrated_dir()
            .join(format!("collisions_integrated_with_severity.{}", self.format.extension()))
    }

    pub fn window_path(&self) -> PathBuf {
        self.integrated_dir().join(format!(
            "collisions_last{}yrs.{}",
            self.window.years,
            self.format.extension()
        ))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.reports_dir().join("run_manifest.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.window.years, 5);
        assert_eq!(config.window.date_column, "merge_date");
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let config: PipelineConfig = toml::from_str(
            r#"
            base_path = "/srv/nyc"
            format = "csv"

            [inputs]
            weather = "/mnt/noaa/central_park.csv"

            [window]
            years = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.format, TableFormat::Csv);
        assert_eq!(config.window.years, 3);
        assert_eq!(config.window.date_column, "merge_date");
        assert_eq!(config.input_path(SourceKind::Crash), PathBuf::from("/srv/nyc/raw/crashes.csv"));
        assert_eq!(
            config.input_path(SourceKind::Weather),
            PathBuf::from("/mnt/noaa/central_park.csv")
        );
        assert_eq!(
            config.window_path(),
            PathBuf::from("/srv/nyc/integrated/collisions_last3yrs.csv")
        );
    }

    #[test]
    fn test_artifact_layout() {
        let config = PipelineConfig {
            base_path: PathBuf::from("base"),
            ..Default::default()
        };
        assert_eq!(
            config.pre_conditioning_path(SourceKind::Vehicle),
            PathBuf::from("base/conditioning/vehicles_PRE_conditioning.parquet")
        );
        assert_eq!(
            config.post_conditioning_path(SourceKind::Person),
            PathBuf::from("base/conditioning/person_POST_conditioning.parquet")
        );
        assert_eq!(config.integrated_csv_path(), PathBuf::from("base/integrated/collisions_integrated.csv"));
        assert_eq!(config.manifest_path(), PathBuf::from("base/reports/run_manifest.json"));
    }

    #[test]
    fn test_validate_rejects_zero_years() {
        let mut config = PipelineConfig::default();
        config.window.years = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_years() {
        let mut config = PipelineConfig::default();
        config.window.years = u32::MAX;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        config.window.years = i32::MAX as u32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
