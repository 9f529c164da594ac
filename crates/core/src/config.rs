//! Configuration file
//!
//! blobq keeps its settings in a TOML file, by default
//! `<config dir>/blobq/config.toml`. `BLOBQ_CONFIG_DIR` overrides the
//! directory, which is how tests and sandboxed runs point it elsewhere.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BLOBQ_CONFIG_DIR";

/// Worker threads per queue when neither flag nor config sets a count
pub const DEFAULT_THREADS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub aliases: Vec<Alias>,
}

/// Settings applied when the command line does not override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Upload workers started per bucket
    #[serde(default = "default_threads")]
    pub upload_threads: usize,

    /// Download workers started per bucket
    #[serde(default = "default_threads")]
    pub download_threads: usize,

    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_output() -> String {
    "human".to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            upload_threads: DEFAULT_THREADS,
            download_threads: DEFAULT_THREADS,
            output: default_output(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            aliases: Vec::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.defaults.upload_threads == 0 || self.defaults.download_threads == 0 {
            return Err(Error::Config(
                "defaults.upload_threads and defaults.download_threads must be at least 1".into(),
            ));
        }
        if !matches!(self.defaults.output.as_str(), "human" | "json") {
            return Err(Error::Config(format!(
                "Unknown output format '{}', expected \"human\" or \"json\"",
                self.defaults.output
            )));
        }
        Ok(())
    }
}

/// Loads and saves the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Use `$BLOBQ_CONFIG_DIR/config.toml`, falling back to the platform
    /// configuration directory
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("blobq"),
        };
        Ok(Self {
            config_path: dir.join("config.toml"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Read the configuration; a missing file yields the defaults
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {SCHEMA_VERSION}. Please upgrade blobq.",
                config.schema_version
            )));
        }
        config.schema_version = SCHEMA_VERSION;
        config.validate()?;

        Ok(config)
    }

    /// Write the configuration, readable by the owner only
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&self.config_path, toml::to_string_pretty(config)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.config_path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
