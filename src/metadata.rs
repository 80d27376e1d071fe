//! Meeting metadata lookup.
//!
//! Consulted once per session, best-effort: any failure degrades to
//! placeholder metadata without failing session creation.

use crate::error::{HarkError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Descriptive fields for one meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub title: String,
    /// Participant roster, used for speaker reconciliation.
    pub participants: Vec<String>,
    pub organizer: Option<String>,
}

impl MeetingInfo {
    /// Placeholder used until (or in place of) a successful lookup.
    pub fn placeholder(meeting_url: &str) -> Self {
        Self {
            title: if meeting_url.is_empty() {
                "Untitled meeting".to_string()
            } else {
                meeting_url.to_string()
            },
            participants: Vec::new(),
            organizer: None,
        }
    }
}

/// Trait for metadata services resolving an entity id to meeting info.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn meeting_info(&self, entity_id: &str) -> Result<MeetingInfo>;
}

/// Metadata service over a plain HTTP endpoint.
pub struct HttpMetadataService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpMetadataService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HarkError::Config(format!("Invalid metadata base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HarkError::Http)?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl MetadataService for HttpMetadataService {
    async fn meeting_info(&self, entity_id: &str) -> Result<MeetingInfo> {
        let url = self
            .base_url
            .join(&format!("meetings/{}", entity_id))
            .map_err(|e| HarkError::Metadata(format!("invalid metadata URL: {}", e)))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HarkError::Metadata(format!(
                "metadata endpoint returned {} for {}",
                response.status(),
                entity_id
            )));
        }

        let info: MeetingInfo = response.json().await?;
        debug!(
            "Resolved metadata for {}: {} ({} participants)",
            entity_id,
            info.title,
            info.participants.len()
        );
        Ok(info)
    }
}

/// Metadata service that always answers with placeholders; used when no
/// metadata endpoint is configured.
pub struct NoMetadataService;

#[async_trait]
impl MetadataService for NoMetadataService {
    async fn meeting_info(&self, _entity_id: &str) -> Result<MeetingInfo> {
        Ok(MeetingInfo::placeholder(""))
    }
}
