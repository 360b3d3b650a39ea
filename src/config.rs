//! Pipeline configuration
//!
//! All settings come from an explicit YAML file; nothing is read from or
//! written to the process environment at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::PipelineError;

/// Which slice of the song catalog a run covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Fixed deep-path subset of the catalog, row cap applied.
    #[default]
    Sample,

    /// Full recursive catalog scan, row cap lifted.
    Full,
}

/// Pipeline configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Prefix holding `song_data/` and `log_data/` (local directory or
    /// `s3://bucket/prefix`).
    pub input_root: String,

    /// Prefix receiving the five output table directories.
    pub output_root: String,

    /// Sample or full catalog scan
    #[serde(default)]
    pub scope: Scope,

    /// Maximum rows kept per table after de-duplication; null means unbounded
    #[serde(default = "default_row_cap")]
    pub row_cap: Option<usize>,

    /// Zone used to decompose epoch timestamps into calendar fields.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// S3 access key id (paired with `secret_key`)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// S3 secret access key
    #[serde(default)]
    pub secret_key: Option<String>,

    /// S3 region for remote roots
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_row_cap() -> Option<usize> {
    Some(100)
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl PipelineConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ConfigError {
                message: format!(
                    "Failed to read config file {}: {}",
                    path.as_ref().display(),
                    e
                ),
            }
        })?;
        let config: PipelineConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.access_key_id.is_some() != self.secret_key.is_some() {
            return Err(PipelineError::ConfigError {
                message: "access_key_id and secret_key must be provided together".to_string(),
            });
        }
        if self.row_cap == Some(0) {
            return Err(PipelineError::ConfigError {
                message: "row_cap must be positive; use null for unbounded".to_string(),
            });
        }
        Ok(())
    }

    /// Listing path for the song catalog files under the configured scope.
    ///
    /// Filesystem roots get a glob; URL roots get a directory prefix, which
    /// the engine lists recursively with the `.json` extension filter. Both
    /// select the same file set for this layout.
    pub fn song_data_path(&self) -> String {
        match (self.scope, self.input_is_url()) {
            (Scope::Sample, false) => format!("{}/song_data/A/A/A/*.json", self.input_root()),
            (Scope::Sample, true) => format!("{}/song_data/A/A/A/", self.input_root()),
            (Scope::Full, false) => format!("{}/song_data/*/*/*/*.json", self.input_root()),
            (Scope::Full, true) => format!("{}/song_data/", self.input_root()),
        }
    }

    /// Listing path for the event log files (year/month nesting).
    pub fn log_data_path(&self) -> String {
        if self.input_is_url() {
            format!("{}/log_data/", self.input_root())
        } else {
            format!("{}/log_data/*/*/*.json", self.input_root())
        }
    }

    /// Row cap in effect for this run; a full scan lifts it.
    pub fn effective_row_cap(&self) -> Option<usize> {
        match self.scope {
            Scope::Sample => self.row_cap,
            Scope::Full => None,
        }
    }

    fn input_root(&self) -> &str {
        self.input_root.trim_end_matches('/')
    }

    fn input_is_url(&self) -> bool {
        Url::parse(&self.input_root).is_ok()
    }
}
