use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from `config.toml`. Every key is optional; CLI flags win.
///
/// ```toml
/// parallel = 4
/// grace_period_secs = 5
/// log_file = "/var/log/mirrorsync.log"
/// size_only = false
/// mtime_tolerance_secs = 0
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub parallel: Option<usize>,
    pub grace_period_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub size_only: Option<bool>,
    pub mtime_tolerance_secs: Option<u64>,
}

impl Config {
    /// Default location: `<config dir>/mirrorsync/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("mirrorsync").join("config.toml"))
    }

    /// Load from `path` if given, else from the default location.
    /// A missing default file yields an empty config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let Ok(path) = Self::config_path() else {
                    return Ok(Self::default());
                };
                if !path.exists() {
                    tracing::debug!("No config file at {}", path.display());
                    return Ok(Self::default());
                }
                Self::load_from(&path)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
