/// Application configuration
///
/// Stored as JSON in the user's config directory:
/// - Linux: ~/.config/stitch-catalog/config.json
/// - macOS: ~/Library/Application Support/stitch-catalog/config.json
/// - Windows: %APPDATA%\stitch-catalog\config.json
///
/// Every field is optional in the file; missing fields take their defaults.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Maximum number of designs a medium may hold
pub const DEFAULT_CAPACITY: usize = 8;

/// Base directory where removable devices are mounted on Linux
const MEDIA_BASE: &str = "/media";

const APP_DIR: &str = "stitch-catalog";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// SQLite catalog file
    pub database_path: PathBuf,
    /// Directory whose subdirectories are the mounted removable devices
    pub mount_root: PathBuf,
    /// Server-side design files, referenced by `Design::source_file_ref`
    pub patterns_dir: PathBuf,
    /// Rendered previews, referenced by `Design::preview_image_ref`
    pub previews_dir: PathBuf,
    /// Designs per medium
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            database_path: data_dir.join("catalog.db"),
            mount_root: default_mount_root(),
            patterns_dir: data_dir.join("patterns"),
            previews_dir: data_dir.join("images"),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// `/media/<user>`, where desktop Linux automounts removable drives
pub fn default_mount_root() -> PathBuf {
    Path::new(MEDIA_BASE).join(whoami::username())
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Load the config from its default location, falling back to defaults
    /// when the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}
