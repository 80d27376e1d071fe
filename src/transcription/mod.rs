//! Chunked incremental transcription for Hark.
//!
//! New audio slices are windowed when they exceed the configured window
//! size, submitted to the external provider strictly in order (each
//! window's call carries the context updated by the previous window's
//! result), then merged back into one monotonically-timestamped result.

mod engine;
mod models;
mod openai;
mod speakers;
mod windows;

pub use engine::ChunkedTranscriber;
pub use models::{
    MergedResult, RawTranscription, RawUtterance, TranscriptionContext, Utterance, WindowRequest,
};
pub use openai::OpenAiProvider;
pub use speakers::{is_generic_label, SpeakerReconciler};
pub use windows::{plan_windows, Window};

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Trait for external transcription providers.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe one window of raw audio into structured utterances.
    async fn transcribe_window(
        &self,
        audio: &[u8],
        request: &WindowRequest,
    ) -> Result<RawTranscription>;
}

/// Shared cooldown set when the provider signals a rate limit.
///
/// Rate limits are provider-global, so one entity tripping the limit
/// pauses transcription attempts for every entity until the deadline.
#[derive(Default)]
pub struct RateGate {
    until: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a provider-supplied (or default) cooldown.
    pub fn trip(&self, cooldown: Duration) {
        let deadline = Instant::now() + cooldown;
        let mut until = self.until.lock();
        match *until {
            Some(existing) if existing >= deadline => {}
            _ => *until = Some(deadline),
        }
    }

    /// Whether transcription attempts are currently paused.
    pub fn is_blocked(&self) -> bool {
        let mut until = self.until.lock();
        match *until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }
}
