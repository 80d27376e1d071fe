//! Configuration settings for Hark.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub registry: RegistrySettings,
    pub acquisition: AcquisitionSettings,
    pub transcription: TranscriptionSettings,
    pub session: SessionSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Bot registry polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Base URL of the external bot registry.
    pub base_url: String,
    /// Poll interval in seconds.
    pub poll_interval_seconds: u64,
    /// Consecutive poll failures tolerated before the registry is
    /// treated as empty and active sessions are torn down.
    pub failure_grace_polls: u32,
    /// Base backoff after a failed poll, in seconds.
    pub backoff_base_seconds: u64,
    /// Cap on the failure backoff, in seconds.
    pub backoff_max_seconds: u64,
    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8056".to_string(),
            poll_interval_seconds: 5,
            failure_grace_polls: 3,
            backoff_base_seconds: 2,
            backoff_max_seconds: 60,
            request_timeout_seconds: 10,
        }
    }
}

/// Audio acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Base URL of the audio source.
    pub base_url: String,
    /// Bytes of raw audio per second, used to estimate durations
    /// (default assumes 16 kHz mono s16le).
    pub bytes_per_second: u64,
    /// Retry attempts for transient fetch failures.
    pub max_retries: u32,
    /// Delay between retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8057".to_string(),
            bytes_per_second: 32_000,
            max_retries: 3,
            retry_delay_ms: 500,
            request_timeout_seconds: 30,
        }
    }
}

/// Transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Model for the external transcription provider.
    pub model: String,
    /// Window size for splitting long audio, in seconds.
    pub window_seconds: u32,
    /// Retry attempts per window before it is skipped.
    pub max_retries_per_window: u32,
    /// Delay between per-window retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Language hints forwarded to the provider (first one wins for
    /// providers that take a single hint).
    pub language_hints: Vec<String>,
    /// Cooldown applied after a rate-limit response when the provider
    /// supplies no retry-after, in seconds.
    pub rate_limit_cooldown_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            window_seconds: 300,
            max_retries_per_window: 2,
            retry_delay_ms: 1_000,
            language_hints: Vec::new(),
            rate_limit_cooldown_seconds: 30,
        }
    }
}

/// Session and metadata settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Base URL of the metadata service (empty disables lookups).
    pub metadata_base_url: String,
    /// Request timeout for metadata lookups, in seconds.
    pub metadata_timeout_seconds: u64,
    /// Whether to remap generic provider speaker labels onto the
    /// participant roster.
    pub named_speakers: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            metadata_base_url: String::new(),
            metadata_timeout_seconds: 10,
            named_speakers: true,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::HarkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hark")
            .join("config.toml")
    }

    /// Reject values that would make the pipeline misbehave silently.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.registry.poll_interval_seconds == 0 {
            return Err(crate::error::HarkError::Config(
                "registry.poll_interval_seconds must be > 0".into(),
            ));
        }
        if self.acquisition.bytes_per_second == 0 {
            return Err(crate::error::HarkError::Config(
                "acquisition.bytes_per_second must be > 0".into(),
            ));
        }
        if self.transcription.window_seconds == 0 {
            return Err(crate::error::HarkError::Config(
                "transcription.window_seconds must be > 0".into(),
            ));
        }
        Ok(())
    }
}
