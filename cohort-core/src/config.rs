//! Runtime configuration loaded from `~/.cohort/config.yaml`.
//!
//! Every section except `local` has defaults, so a minimal file only names
//! the authoritative registry endpoint.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::fields::{IntakeFieldMap, RegistryFieldMap};
use crate::resolver::ResolverConfig;

/// One record-store endpoint (URL plus API token).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub local: RegistryFieldMap,
    pub remote: IntakeFieldMap,
}

/// Payload fields removed before write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Dropped from every record.
    pub strip_fields: Vec<String>,
    /// Dropped from repeat-instrument records only, on top of the record id
    /// and new-record flag.
    pub top_level_only_fields: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            strip_fields: vec![
                "redcap_survey_identifier".into(),
                "survey_queue_link".into(),
            ],
            top_level_only_fields: Vec::new(),
        }
    }
}

/// Staff CSV batch uploads. Only participants the registry does not already
/// hold are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchUploadConfig {
    /// Medical record number column, named the same in the batch file and
    /// the registry. Rows without one are rejected.
    pub mrn_field: String,
    /// Set to `"1"` on rows created by a batch upload.
    pub flag_field: String,
}

impl Default for BatchUploadConfig {
    fn default() -> Self {
        Self {
            mrn_field: "mrn".into(),
            flag_field: "local_batch_upload".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The authoritative registry.
    pub local: EndpointConfig,
    /// The intake system; absent when only CSV intake is used.
    #[serde(default)]
    pub remote: Option<EndpointConfig>,
    #[serde(default)]
    pub identity: ResolverConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub batch: BatchUploadConfig,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.local.url.trim().is_empty() {
            return Err(ConfigError::Invalid("local.url must not be empty".into()));
        }
        if let Some(remote) = &self.remote {
            if remote.url.trim().is_empty() {
                return Err(ConfigError::Invalid("remote.url must not be empty".into()));
            }
        }
        if self.identity.reserved_threshold < 2 {
            return Err(ConfigError::Invalid(
                "identity.reserved_threshold must be at least 2".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// `<home>/.cohort/config.yaml`
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".cohort").join("config.yaml")
}

pub fn default_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(default_path_at(&home))
}

/// Load and validate the config at `path`.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Load from the default location.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&default_path()?)
}
