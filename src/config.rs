//! Configuration management for playsession
//!
//! Handles config file loading/saving and environment overrides.
//! Config is stored at ~/.config/playsession/config.toml

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Progress ticker period when nothing else is configured
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;

/// Seconds counted down before re-attempting a source while offline
pub const DEFAULT_RETRY_COUNTDOWN_SECS: u32 = 8;

/// Cast receiver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    /// Receiver environment ("prod", "staging", ...)
    pub environment: String,
    /// Receiver application id
    pub app_id: String,
    /// Receiver player page
    pub player_url: String,
    /// Caption text color (hex, no '#')
    pub caption_color: String,
    /// Caption font size
    pub caption_size: u32,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            environment: "prod".to_string(),
            app_id: "CC1AD845".to_string(),
            player_url: "https://player.example.com/cast/".to_string(),
            caption_color: "ffcc00".to_string(),
            caption_size: 42,
        }
    }
}

impl CastConfig {
    /// Caption selection understood by the receiver, e.g. `[en,ffcc00,42]`
    pub fn caption_theme(&self, language: &str) -> String {
        format!("[{},{},{}]", language, self.caption_color, self.caption_size)
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Progress ticker period in milliseconds
    pub progress_interval_ms: u64,
    /// Countdown start (seconds) for offline retries
    pub retry_countdown_secs: u32,
    /// Autoplay newly created engines
    pub autoplay: bool,
    /// Wait for `plugins_ready()` after each `set_media`
    pub await_plugins: bool,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
    pub cast: CastConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            retry_countdown_secs: DEFAULT_RETRY_COUNTDOWN_SECS,
            autoplay: true,
            await_plugins: false,
            log_filter: "info".to_string(),
            cast: CastConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Get config file path (~/.config/playsession/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("playsession").join("config.toml"))
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
            .with_env_overrides()
    }

    /// Load config from an explicit file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    /// Save config to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Apply overrides from PLAYSESSION_PROGRESS_MS / PLAYSESSION_RETRY_SECS
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_parse::<u64>("PLAYSESSION_PROGRESS_MS") {
            self.progress_interval_ms = ms;
        }
        if let Some(secs) = env_parse::<u32>("PLAYSESSION_RETRY_SECS") {
            self.retry_countdown_secs = secs;
        }
        self
    }

    /// Progress ticker period, never zero
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
