//! Audio acquisition and deduplication for Hark.
//!
//! Fetches each bot's current audio snapshot, fingerprints it, and decides
//! whether it carries genuinely new content since the last *processed*
//! snapshot. Only new content flows downstream to transcription, which is
//! what keeps provider spend proportional to actual speech.

mod http;

pub use http::HttpAudioFetcher;

use crate::config::AcquisitionSettings;
use crate::error::{HarkError, Result};
use crate::registry::BotHandle;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one raw audio fetch from the source.
#[derive(Debug)]
pub enum AudioFetch {
    /// Audio bytes are available.
    Ready(Vec<u8>),
    /// The source has nothing yet (too early). Not an error.
    NotYetAvailable,
    /// The source definitively has no audio for this id.
    NotFound,
}

/// Trait for audio sources, keyed by the bot's legacy id.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch_audio(&self, legacy_id: &str) -> Result<AudioFetch>;
}

/// Fingerprint and size bookkeeping for one fetched buffer.
#[derive(Debug, Clone)]
pub struct AudioSnapshot {
    /// SHA-256 of the full raw buffer, lowercase hex.
    pub fingerprint: String,
    /// Length of the full buffer in bytes.
    pub byte_len: u64,
    /// Duration estimate for the full buffer, in seconds.
    pub duration_estimate_secs: f64,
    /// Fingerprint of the last processed buffer, if any.
    pub previous_fingerprint: Option<String>,
}

/// New content ready for chunked transcription.
#[derive(Debug)]
pub struct AcquisitionResult {
    /// Snapshot of the full buffer this slice came from.
    pub snapshot: AudioSnapshot,
    /// The bytes downstream chunking should actually process.
    pub slice: Vec<u8>,
    /// Duration estimate for `slice`, in seconds.
    pub slice_duration_secs: f64,
    /// Session-relative time at which `slice` begins.
    pub base_offset_secs: f64,
}

#[derive(Debug, Default, Clone)]
struct ProcessedState {
    fingerprint: String,
    byte_len: u64,
    duration_secs: f64,
}

/// Per-entity acquisition with fingerprint dedup and single-flight.
pub struct Acquirer {
    fetcher: Arc<dyn AudioFetcher>,
    settings: AcquisitionSettings,
    processed: DashMap<String, ProcessedState>,
    in_flight: parking_lot::Mutex<HashSet<String>>,
}

impl Acquirer {
    pub fn new(fetcher: Arc<dyn AudioFetcher>, settings: AcquisitionSettings) -> Self {
        Self {
            fetcher,
            settings,
            processed: DashMap::new(),
            in_flight: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Fetch the current audio for a bot and return new content, if any.
    ///
    /// Returns `Ok(None)` when there is nothing new to process: audio not
    /// yet available, audio gone, byte-identical to the last processed
    /// buffer, or another fetch for the same entity is already in flight
    /// (the caller picks the result up on its next cycle instead of
    /// issuing a duplicate network call).
    pub async fn fetch(&self, handle: &BotHandle) -> Result<Option<AcquisitionResult>> {
        if !self.in_flight.lock().insert(handle.id.clone()) {
            debug!("Fetch for {} already in flight, skipping", handle.id);
            return Ok(None);
        }

        // Cleared on every exit path, unwinding included; a stale marker
        // would block the entity from ever being fetched again.
        let _clear = InFlightClear {
            set: &self.in_flight,
            entity_id: &handle.id,
        };
        self.fetch_inner(handle).await
    }

    async fn fetch_inner(&self, handle: &BotHandle) -> Result<Option<AcquisitionResult>> {
        let bytes = match self.fetch_with_retries(&handle.legacy_id).await? {
            AudioFetch::Ready(bytes) => bytes,
            AudioFetch::NotYetAvailable => {
                debug!("Audio for {} not yet available", handle.id);
                return Ok(None);
            }
            AudioFetch::NotFound => {
                // Nothing to retry against; drop any buffered state.
                debug!("Audio for {} not found, clearing state", handle.id);
                self.processed.remove(&handle.id);
                return Ok(None);
            }
        };

        if bytes.is_empty() {
            return Ok(None);
        }

        let fingerprint = fingerprint_bytes(&bytes);
        let previous = self.processed.get(&handle.id).map(|s| s.clone());

        if let Some(prev) = &previous {
            if prev.fingerprint == fingerprint {
                debug!("Audio for {} unchanged since last processed", handle.id);
                return Ok(None);
            }
            if (bytes.len() as u64) < prev.byte_len {
                return Err(HarkError::SnapshotInconsistent(format!(
                    "audio for {} shrank from {} to {} bytes",
                    handle.id,
                    prev.byte_len,
                    bytes.len()
                )));
            }
        }

        let snapshot = AudioSnapshot {
            fingerprint,
            byte_len: bytes.len() as u64,
            duration_estimate_secs: self.estimate_duration(bytes.len() as u64),
            previous_fingerprint: previous.as_ref().map(|p| p.fingerprint.clone()),
        };

        // Prefix-superset check: the stored fingerprint covers the whole
        // previously-processed buffer, so hashing the same-length prefix
        // of the new buffer decides it exactly. Anything else falls back
        // to reprocessing the whole buffer rather than guessing an offset.
        let (slice, base_offset_secs) = match &previous {
            Some(prev) if fingerprint_bytes(&bytes[..prev.byte_len as usize]) == prev.fingerprint => {
                debug!(
                    "Audio for {} grew by {} bytes, slicing tail",
                    handle.id,
                    bytes.len() as u64 - prev.byte_len
                );
                (bytes[prev.byte_len as usize..].to_vec(), prev.duration_secs)
            }
            Some(_) => {
                warn!(
                    "Audio for {} changed without a common prefix, reprocessing whole buffer",
                    handle.id
                );
                (bytes, 0.0)
            }
            None => (bytes, 0.0),
        };

        let slice_duration_secs = self.estimate_duration(slice.len() as u64);

        Ok(Some(AcquisitionResult {
            snapshot,
            slice,
            slice_duration_secs,
            base_offset_secs,
        }))
    }

    async fn fetch_with_retries(&self, legacy_id: &str) -> Result<AudioFetch> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch_audio(legacy_id).await {
                Ok(fetch) => return Ok(fetch),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(
                        "Audio fetch for {} failed (attempt {}): {}",
                        legacy_id, attempt, e
                    );
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record that a snapshot's content made it into a session.
    ///
    /// Dedup compares against the last *processed* fingerprint, not the
    /// last fetched one, so this is only called after a successful append.
    pub fn mark_processed(&self, entity_id: &str, snapshot: &AudioSnapshot) {
        self.processed.insert(
            entity_id.to_string(),
            ProcessedState {
                fingerprint: snapshot.fingerprint.clone(),
                byte_len: snapshot.byte_len,
                duration_secs: snapshot.duration_estimate_secs,
            },
        );
    }

    /// Drop all buffered state for an entity (registry `left`, not-found).
    pub fn forget(&self, entity_id: &str) {
        self.processed.remove(entity_id);
    }

    fn estimate_duration(&self, byte_len: u64) -> f64 {
        byte_len as f64 / self.settings.bytes_per_second as f64
    }
}

struct InFlightClear<'a> {
    set: &'a parking_lot::Mutex<HashSet<String>>,
    entity_id: &'a str,
}

impl Drop for InFlightClear<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(self.entity_id);
    }
}

/// SHA-256 content fingerprint, lowercase hex.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeFetcher {
        responses: Mutex<Vec<Result<AudioFetch>>>,
        calls: Mutex<u32>,
    }

    impl FakeFetcher {
        fn new(responses: Vec<Result<AudioFetch>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl AudioFetcher for FakeFetcher {
        async fn fetch_audio(&self, _legacy_id: &str) -> Result<AudioFetch> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(AudioFetch::NotYetAvailable)
            } else {
                responses.remove(0)
            }
        }
    }

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            bytes_per_second: 100,
            max_retries: 2,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn handle() -> BotHandle {
        BotHandle::new("b1", "legacy-b1", "https://meet/b1")
    }

    #[tokio::test]
    async fn test_identical_audio_dedups() {
        let audio = vec![1u8; 500];
        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(audio.clone())),
            Ok(AudioFetch::Ready(audio)),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        let first = acquirer.fetch(&handle()).await.unwrap().unwrap();
        acquirer.mark_processed("b1", &first.snapshot);

        let second = acquirer.fetch(&handle()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_unprocessed_refetch_is_not_deduped() {
        // Identical bytes but the first result never reached a session:
        // the content must be offered again.
        let audio = vec![1u8; 500];
        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(audio.clone())),
            Ok(AudioFetch::Ready(audio)),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        assert!(acquirer.fetch(&handle()).await.unwrap().is_some());
        assert!(acquirer.fetch(&handle()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_superset_slices_tail() {
        let mut grown = vec![1u8; 500];
        let original = grown.clone();
        grown.extend(vec![2u8; 300]);

        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(original)),
            Ok(AudioFetch::Ready(grown)),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        let first = acquirer.fetch(&handle()).await.unwrap().unwrap();
        assert_eq!(first.base_offset_secs, 0.0);
        assert_eq!(first.slice.len(), 500);
        acquirer.mark_processed("b1", &first.snapshot);

        let second = acquirer.fetch(&handle()).await.unwrap().unwrap();
        assert_eq!(second.slice.len(), 300);
        assert_eq!(second.base_offset_secs, 5.0);
        assert_eq!(second.slice_duration_secs, 3.0);
        assert!(second.slice.iter().all(|&b| b == 2));
    }

    #[tokio::test]
    async fn test_non_prefix_change_reprocesses_whole_buffer() {
        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(vec![1u8; 500])),
            Ok(AudioFetch::Ready(vec![9u8; 800])),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        let first = acquirer.fetch(&handle()).await.unwrap().unwrap();
        acquirer.mark_processed("b1", &first.snapshot);

        let second = acquirer.fetch(&handle()).await.unwrap().unwrap();
        assert_eq!(second.slice.len(), 800);
        assert_eq!(second.base_offset_secs, 0.0);
    }

    #[tokio::test]
    async fn test_shrinking_audio_is_inconsistent() {
        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(vec![1u8; 500])),
            Ok(AudioFetch::Ready(vec![1u8; 100])),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        let first = acquirer.fetch(&handle()).await.unwrap().unwrap();
        acquirer.mark_processed("b1", &first.snapshot);

        let result = acquirer.fetch(&handle()).await;
        assert!(matches!(result, Err(HarkError::SnapshotInconsistent(_))));
    }

    #[tokio::test]
    async fn test_not_yet_available_is_quiet() {
        let fetcher = FakeFetcher::new(vec![Ok(AudioFetch::NotYetAvailable)]);
        let acquirer = Acquirer::new(fetcher, settings());
        assert!(acquirer.fetch(&handle()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_not_found_clears_state() {
        let fetcher = FakeFetcher::new(vec![
            Ok(AudioFetch::Ready(vec![1u8; 500])),
            Ok(AudioFetch::NotFound),
            // After state was cleared the same bytes count as new again.
            Ok(AudioFetch::Ready(vec![1u8; 500])),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        let first = acquirer.fetch(&handle()).await.unwrap().unwrap();
        acquirer.mark_processed("b1", &first.snapshot);

        assert!(acquirer.fetch(&handle()).await.unwrap().is_none());
        assert!(acquirer.fetch(&handle()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transient_errors_retry_bounded() {
        let fetcher = FakeFetcher::new(vec![
            Err(HarkError::AudioFetch("timeout".into())),
            Err(HarkError::AudioFetch("timeout".into())),
            Ok(AudioFetch::Ready(vec![1u8; 200])),
        ]);
        let acquirer = Acquirer::new(fetcher.clone(), settings());

        let result = acquirer.fetch(&handle()).await.unwrap();
        assert!(result.is_some());
        assert_eq!(*fetcher.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust_and_surface() {
        let fetcher = FakeFetcher::new(vec![
            Err(HarkError::AudioFetch("timeout".into())),
            Err(HarkError::AudioFetch("timeout".into())),
            Err(HarkError::AudioFetch("timeout".into())),
        ]);
        let acquirer = Acquirer::new(fetcher, settings());

        assert!(acquirer.fetch(&handle()).await.is_err());
    }
}
