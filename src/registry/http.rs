//! HTTP bot registry client.

use super::{BotHandle, RegistryClient};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Wire shape of one registry listing entry.
///
/// The registry may name the legacy id either `legacy_id` or `uuid`
/// depending on its version; both are accepted.
#[derive(Debug, Deserialize)]
struct BotEntry {
    id: String,
    #[serde(alias = "uuid")]
    legacy_id: Option<String>,
    #[serde(alias = "meetingUrl")]
    meeting_url: Option<String>,
}

/// Registry client over a plain HTTP listing endpoint.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    list_url: Url,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| HarkError::Config(format!("Invalid registry base URL: {}", e)))?;
        let list_url = base
            .join("bots")
            .map_err(|e| HarkError::Config(format!("Invalid registry base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HarkError::Http)?;

        Ok(Self { client, list_url })
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_bots(&self) -> Result<Vec<BotHandle>> {
        let response = self.client.get(self.list_url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarkError::Registry(format!(
                "listing endpoint returned {}",
                status
            )));
        }

        let entries: Vec<BotEntry> = response.json().await?;
        debug!("Registry listed {} bots", entries.len());

        let now = Utc::now();
        Ok(entries
            .into_iter()
            .map(|e| BotHandle {
                legacy_id: e.legacy_id.unwrap_or_else(|| e.id.clone()),
                meeting_url: e.meeting_url.unwrap_or_default(),
                id: e.id,
                last_seen: now,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = HttpRegistryClient::new("not a url", Duration::from_secs(5));
        assert!(matches!(result, Err(HarkError::Config(_))));
    }

    #[test]
    fn test_entry_aliases() {
        let entry: BotEntry =
            serde_json::from_str(r#"{"id":"b1","uuid":"legacy-1","meetingUrl":"https://meet/x"}"#)
                .unwrap();
        assert_eq!(entry.legacy_id.as_deref(), Some("legacy-1"));
        assert_eq!(entry.meeting_url.as_deref(), Some("https://meet/x"));
    }
}
