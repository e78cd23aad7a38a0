// 🚨 Pipeline Errors
// Two tiers: fatal configuration/integrity errors abort the run,
// data-quality anomalies are counted in the stage reports and never land here.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A mandatory logical field matched none of its aliases
    #[error(
        "{source_name}: no column found for required field '{field}' \
         (tried aliases {aliases:?}; available columns {available:?})"
    )]
    MissingColumn {
        source_name: String,
        field: String,
        aliases: Vec<String>,
        available: Vec<String>,
    },

    /// A structural check after integration failed
    #[error("validation '{check}' failed: {detail}")]
    Validation { check: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported table format for {0} (expected .csv or .parquet)")]
    UnsupportedFormat(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn validation(check: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::Validation {
            check: check.into(),
            detail: detail.into(),
        }
    }

    /// True for the errors that describe bad input shape rather than bad infrastructure
    pub fn is_fatal_schema_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingColumn { .. } | PipelineError::Validation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
