//! Error types for Hark.

use thiserror::Error;

/// Library-level error type for Hark operations.
///
/// Variants map onto the failure classes the pipeline distinguishes:
/// transient-retryable, permanent-per-cycle, rate-limit, and fatal
/// (configuration). Everything that is not fatal degrades to a skipped
/// entity/cycle rather than a process exit.
#[derive(Error, Debug)]
pub enum HarkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Audio fetch failed: {0}")]
    AudioFetch(String),

    #[error("Audio not found for entity {0}")]
    AudioNotFound(String),

    #[error("Audio snapshot inconsistent: {0}")]
    SnapshotInconsistent(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Provider API error: {0}")]
    Provider(String),

    #[error("Provider rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Metadata lookup failed: {0}")]
    Metadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarkError {
    /// Whether a bounded retry within the same cycle is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarkError::AudioFetch(_) | HarkError::Transcription(_) | HarkError::Provider(_) => true,
            HarkError::Http(e) => e.is_timeout() || e.is_connect() || status_is_5xx(e),
            _ => false,
        }
    }

    /// Whether this error permanently invalidates the entity for this cycle.
    pub fn is_permanent_for_cycle(&self) -> bool {
        matches!(
            self,
            HarkError::AudioNotFound(_) | HarkError::SnapshotInconsistent(_)
        )
    }
}

fn status_is_5xx(e: &reqwest::Error) -> bool {
    e.status().is_some_and(|s| s.is_server_error())
}

/// Result type alias for Hark operations.
pub type Result<T> = std::result::Result<T, HarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HarkError::AudioFetch("timeout".into()).is_retryable());
        assert!(HarkError::Provider("502".into()).is_retryable());
        assert!(!HarkError::AudioNotFound("b1".into()).is_retryable());
        assert!(!HarkError::RateLimited { retry_after_secs: 30 }.is_retryable());
        assert!(!HarkError::Config("missing key".into()).is_retryable());
    }

    #[test]
    fn test_permanent_for_cycle() {
        assert!(HarkError::AudioNotFound("b1".into()).is_permanent_for_cycle());
        assert!(HarkError::SnapshotInconsistent("shrank".into()).is_permanent_for_cycle());
        assert!(!HarkError::AudioFetch("x".into()).is_permanent_for_cycle());
    }
}
