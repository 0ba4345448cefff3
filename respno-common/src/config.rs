//! Configuration loading and data folder resolution
//!
//! Configuration comes from an optional TOML file. A missing file is never
//! fatal: compiled defaults are used and the caller logs the fallback. A file that
//! exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the data folder
pub const DATA_FOLDER_ENV: &str = "RESPNO_DATA_FOLDER";

/// Environment variable pointing at an alternate config file
pub const CONFIG_PATH_ENV: &str = "RESPNO_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding `transcripts.json` and `analyses.json`
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Field names and sheet names the reconciler recognizes in analysis documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Sheet carrying one row per respondent
    #[serde(default = "default_primary_sheet")]
    pub primary_sheet: String,

    /// Respondent identifier fields, canonical name first
    #[serde(default = "default_respondent_fields")]
    pub respondent_fields: Vec<String>,

    /// Transcript back-reference fields, canonical name first
    #[serde(default = "default_back_reference_fields")]
    pub back_reference_fields: Vec<String>,

    /// Write the canonical back-reference onto rows that lack one
    #[serde(default)]
    pub stamp_back_references: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            primary_sheet: default_primary_sheet(),
            respondent_fields: default_respondent_fields(),
            back_reference_fields: default_back_reference_fields(),
            stamp_back_references: false,
        }
    }
}

fn default_primary_sheet() -> String {
    "Demographics".to_string()
}

fn default_respondent_fields() -> Vec<String> {
    vec!["Respondent ID".to_string(), "respno".to_string()]
}

fn default_back_reference_fields() -> Vec<String> {
    vec!["transcriptId".to_string()]
}

impl ReconcileSettings {
    /// Reject settings the reconciler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.primary_sheet.trim().is_empty() {
            return Err(Error::Config("reconcile.primary_sheet must not be empty".to_string()));
        }
        if self.respondent_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(Error::Config(
                "reconcile.respondent_fields needs at least one field name".to_string(),
            ));
        }
        if self.back_reference_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(Error::Config(
                "reconcile.back_reference_fields needs at least one field name".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config file location for the platform
///
/// `~/.config/respno/config.toml` on Linux, the platform config dir elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("respno").join("config.toml"))
}

/// Where the loaded configuration came from
///
/// Returned alongside the config so the caller can report it once logging
/// is set up; nothing is logged while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file
    File(PathBuf),
    /// No file at this path, compiled defaults in use
    Missing(PathBuf),
    /// No config directory on this platform, compiled defaults in use
    NoConfigDir,
}

impl ConfigSource {
    /// Emit the outcome of config loading
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "Loaded config file"),
            ConfigSource::Missing(path) => warn!(
                path = %path.display(),
                "Config file not found, using compiled defaults"
            ),
            ConfigSource::NoConfigDir => {
                warn!("Could not determine config directory, using compiled defaults")
            }
        }
    }
}

/// Load the TOML configuration
///
/// Lookup order:
/// 1. Explicit path (command line) - must exist
/// 2. `RESPNO_CONFIG` environment variable
/// 3. Platform default config path
///
/// Missing files in steps 2-3 fall back to defaults; the returned
/// [`ConfigSource`] says which case applied.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = read_toml_config(path)?;
        return Ok((config, ConfigSource::File(path.to_path_buf())));
    }

    let candidate = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(default_config_path);

    match candidate {
        Some(path) if path.exists() => {
            let config = read_toml_config(&path)?;
            Ok((config, ConfigSource::File(path)))
        }
        Some(path) => Ok((TomlConfig::default(), ConfigSource::Missing(path))),
        None => Ok((TomlConfig::default(), ConfigSource::NoConfigDir)),
    }
}

fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    config.reconcile.validate()?;
    Ok(config)
}

/// Data folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `RESPNO_DATA_FOLDER` environment variable
/// 3. TOML `data_folder`
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.data_folder {
        return path.clone();
    }

    default_data_folder()
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("respno"))
        .unwrap_or_else(|| PathBuf::from("./respno_data"))
}

/// Create the data folder if it does not exist yet
pub fn ensure_data_folder(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        debug!(path = %path.display(), "Created data folder");
    }
    Ok(())
}
