// 🧾 Run Manifest
// Audit record of one pipeline run: which artifacts were written, how many
// rows each holds, their SHA-256 digests, and every stage report.

use crate::config::PipelineConfig;
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::storage::count_rows;
use crate::window::WindowBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub path: PathBuf,
    pub rows: u64,
    pub sha256: String,
}

impl ArtifactRecord {
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        Ok(ArtifactRecord {
            name: name.into(),
            path: path.to_path_buf(),
            rows: count_rows(path)?,
            sha256: file_sha256(path)?,
        })
    }
}

/// Hex SHA-256 of a file, streamed
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config: PipelineConfig,
    pub artifacts: Vec<ArtifactRecord>,
    pub reports: Vec<StageReport>,
    pub window: Option<WindowBounds>,
}

impl RunManifest {
    pub fn start(config: &PipelineConfig) -> Self {
        RunManifest {
            run_id: uuid::Uuid::new_v4().to_string(),
            version: crate::VERSION.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            config: config.clone(),
            artifacts: Vec::new(),
            reports: Vec::new(),
            window: None,
        }
    }

    pub fn record_artifact(&mut self, name: &str, path: &Path) -> Result<()> {
        self.artifacts.push(ArtifactRecord::from_file(name, path)?);
        Ok(())
    }

    pub fn artifact(&self, name: &str) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
