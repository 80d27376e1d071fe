//! Bot registry abstraction for Hark.
//!
//! The registry is an external service listing the recording bots that are
//! currently live. This module provides the client trait, the handle type
//! copied into dependent components, and the reconciler that turns two
//! consecutive observations into an entered/left diff.

mod http;
mod reconciler;

pub use http::HttpRegistryClient;
pub use reconciler::{Reconciler, RegistryDiff};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and descriptive data for one externally-managed recording bot.
///
/// Handles are copied by value into dependent components so a registry
/// refresh never mutates state another component is reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotHandle {
    /// Stable entity id.
    pub id: String,
    /// Legacy/alternate id, used only for audio retrieval.
    pub legacy_id: String,
    /// URL of the meeting the bot is recording.
    pub meeting_url: String,
    /// When the registry last reported this bot.
    pub last_seen: DateTime<Utc>,
}

impl BotHandle {
    pub fn new(id: impl Into<String>, legacy_id: impl Into<String>, meeting_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            legacy_id: legacy_id.into(),
            meeting_url: meeting_url.into(),
            last_seen: Utc::now(),
        }
    }
}

/// Trait for bot registry clients.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the full current listing of live bots.
    async fn list_bots(&self) -> Result<Vec<BotHandle>>;
}
