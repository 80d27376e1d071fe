//! Live fan-out events and the subscriber seam.
//!
//! The concrete transport (SSE, websocket, callback) lives outside this
//! crate; anything that can implement `Subscriber` can attach.

use super::{SessionAggregates, SessionSnapshot, TranscriptSegment};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// One state-change event pushed to session subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent once, immediately on subscribe.
    Snapshot { session: SessionSnapshot },
    /// New segments were appended to the session.
    SegmentsAppended {
        session_id: String,
        segments: Vec<TranscriptSegment>,
        aggregates: SessionAggregates,
    },
    /// Terminal event; the session accepts no further mutation and the
    /// subscription is closed after delivery.
    Stopped { session_id: String },
}

/// Delivery failure for one subscriber. The subscriber is unregistered;
/// nothing else is affected.
#[derive(Debug, Error)]
#[error("subscriber delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// An open delivery channel registered against a session.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, event: &SessionEvent) -> Result<(), DeliveryError>;
}

/// Subscriber over an unbounded tokio channel, for transports that pull
/// events from a receiver task.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, event: &SessionEvent) -> Result<(), DeliveryError> {
        self.tx
            .send(event.clone())
            .map_err(|_| DeliveryError("receiver dropped".into()))
    }
}
