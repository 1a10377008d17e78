//! User defaults.
//!
//! Optional defaults read from ~/.config/pingr/config.toml. Command-line
//! values always win over the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::interval_duration;

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefs {
    /// Default interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    /// Default IP time to live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u8>,
    /// Skip reverse lookup of the target by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<bool>,
}

impl Prefs {
    /// Get config file path: ~/.config/pingr/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pingr").join("config.toml"))
    }

    /// Load preferences from disk (defaults for a missing/invalid file or value)
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    /// Load preferences from an explicit file
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str::<Self>(&contents) {
            Ok(prefs) => prefs.without_invalid(path),
            Err(e) => {
                log::warn!("ignoring invalid config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Drop values that parse but are out of range
    fn without_invalid(mut self, path: &Path) -> Self {
        if let Some(interval) = self.interval {
            if let Err(e) = interval_duration(interval) {
                log::warn!("ignoring interval in {}: {}", path.display(), e);
                self.interval = None;
            }
        }
        if self.ttl == Some(0) {
            log::warn!("ignoring ttl in {}: must be between 1 and 255", path.display());
            self.ttl = None;
        }
        self
    }
}
