//! Relay configuration
//!
//! Loads settings from a JSON file, applies environment overrides, and
//! validates the result before the relay starts.
//!
//! # Environment overrides
//!
//! - `VOICE_RELAY_API_KEY` - upstream API key
//! - `VOICE_RELAY_BIND` - listen address of the transport server
//!
//! # Example
//!
//! ```no_run
//! use voice_relay_lib::config::ConfigManager;
//!
//! let mut config = ConfigManager::load("voice-relay.json")?;
//! config.apply_env_overrides();
//! config.validate()?;
//! # Ok::<(), voice_relay_lib::config::ConfigError>(())
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::pipeline::{DEFAULT_FRAME_SIZE, DEFAULT_TARGET_RATE};
use crate::audio::playback::DEFAULT_PLAYBACK_RATE;
use crate::network::UpstreamConfig;
use crate::relay::PartRouting;

/// Environment variable holding the upstream API key
pub const ENV_API_KEY: &str = "VOICE_RELAY_API_KEY";

/// Environment variable holding the listen address
pub const ENV_BIND: &str = "VOICE_RELAY_BIND";

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:8765";

/// Config error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse/serialize error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No upstream API key
    #[error("No upstream API key configured (set VOICE_RELAY_API_KEY)")]
    MissingApiKey,

    /// A value is out of range or unparseable
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Config result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Transport server settings
    pub server: ServerConfig,
    /// Upstream service settings
    pub upstream: UpstreamConfig,
    /// Audio settings (used by the client)
    pub audio: AudioConfig,
    /// Relay behaviour
    pub relay: RelaySettings,
}

/// Transport server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Raw samples per captured frame
    pub frame_size: usize,
    /// Rate microphone audio is sent at
    pub capture_rate: u32,
    /// Rate assumed for server audio without a rate tag
    pub playback_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            capture_rate: DEFAULT_TARGET_RATE,
            playback_rate: DEFAULT_PLAYBACK_RATE,
        }
    }
}

/// Relay behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Which parts of a multi-part server message reach the client
    pub part_routing: PartRouting,
}

impl RelayConfig {
    /// Apply `VOICE_RELAY_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            tracing::debug!("API key taken from environment");
            self.upstream.api_key = key;
        }
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.is_empty()) {
            tracing::debug!(bind = %bind, "Bind address taken from environment");
            self.server.bind = bind;
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// `ConfigError::MissingApiKey` without an API key, `ConfigError::Invalid`
    /// for an unparseable bind address, a non-WebSocket upstream URL, or zero
    /// audio sizes.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        self.bind_addr()?;

        self.upstream
            .build_url()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.audio.frame_size == 0 {
            return Err(ConfigError::Invalid("audio.frame_size must be positive".to_string()));
        }
        if self.audio.capture_rate == 0 || self.audio.playback_rate == 0 {
            return Err(ConfigError::Invalid("audio rates must be positive".to_string()));
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind address: {}", self.server.bind)))
    }
}

/// Config manager
///
/// Loads and saves configuration files.
pub struct ConfigManager;

impl ConfigManager {
    /// Load a config file
    ///
    /// Returns defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<RelayConfig> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "Loading config");

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: RelayConfig = serde_json::from_str(&content)?;
            tracing::info!(path = %path.display(), "Config loaded successfully");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(RelayConfig::default())
        }
    }

    /// Save a config file
    pub fn save(path: impl AsRef<Path>, config: &RelayConfig) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Config saved successfully");
        Ok(())
    }
}
