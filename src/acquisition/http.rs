//! HTTP audio source client.

use super::{AudioFetch, AudioFetcher};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Audio source over a plain HTTP byte endpoint, keyed by legacy id.
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAudioFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HarkError::Config(format!("Invalid audio source base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HarkError::Http)?;

        Ok(Self { client, base_url })
    }

    fn audio_url(&self, legacy_id: &str) -> Result<Url> {
        self.base_url
            .join(&format!("audio/{}", legacy_id))
            .map_err(|e| HarkError::AudioFetch(format!("invalid audio URL: {}", e)))
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch_audio(&self, legacy_id: &str) -> Result<AudioFetch> {
        let url = self.audio_url(legacy_id)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?;
                debug!("Fetched {} audio bytes for {}", bytes.len(), legacy_id);
                Ok(AudioFetch::Ready(bytes.to_vec()))
            }
            // The recorder hasn't produced anything yet. Too early, retry
            // on the next poll.
            StatusCode::NO_CONTENT | StatusCode::ACCEPTED => Ok(AudioFetch::NotYetAvailable),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(AudioFetch::NotFound),
            status if status.is_server_error() => Err(HarkError::AudioFetch(format!(
                "audio source returned {} for {}",
                status, legacy_id
            ))),
            status => Err(HarkError::AudioNotFound(format!(
                "{} (unexpected status {})",
                legacy_id, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_url_joins_legacy_id() {
        let fetcher =
            HttpAudioFetcher::new("http://localhost:9000/", Duration::from_secs(5)).unwrap();
        let url = fetcher.audio_url("legacy-42").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/audio/legacy-42");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpAudioFetcher::new("::::", Duration::from_secs(5)).is_err());
    }
}
