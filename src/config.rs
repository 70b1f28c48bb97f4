//! User settings
//!
//! Stored in ~/.config/ytmusic-offline/config.json. Every field is optional on
//! disk; missing ones take their defaults. Command-line flags override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::download::{ManagerConfig, WorkerConfig};

/// Folder created under the music directory
const LIBRARY_DIR: &str = "YTMusic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parent of the `YTMusic` library folder; the platform music dir if unset
    pub music_root: Option<PathBuf>,
    /// Base URL of the Invidious-compatible instance
    pub provider_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Abort a transfer after this long without receiving data
    pub stream_idle_timeout_secs: u64,
    pub progress_interval_ms: u64,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            music_root: None,
            provider_url: "http://localhost:3000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            stream_idle_timeout_secs: 30,
            progress_interval_ms: 250,
            event_buffer: 256,
        }
    }
}

impl Settings {
    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load settings from `path`, falling back to defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {:?}", path))?;

        debug!("Loaded config from {:?}", path);
        Ok(settings)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("ytmusic-offline").join("config.json"))
    }

    /// `<music root>/YTMusic`
    pub fn library_root(&self) -> Result<PathBuf> {
        let music = match &self.music_root {
            Some(root) => root.clone(),
            None => dirs::audio_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
                .ok_or_else(|| anyhow::anyhow!("Could not determine music directory"))?,
        };
        Ok(music.join(LIBRARY_DIR))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            worker: WorkerConfig {
                idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs.max(1)),
                progress_interval: Duration::from_millis(self.progress_interval_ms),
            },
            event_buffer: self.event_buffer,
        }
    }
}
