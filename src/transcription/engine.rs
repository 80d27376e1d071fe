//! Sequential window transcription and merge.

use super::models::{MergedResult, TranscriptionContext, Utterance, WindowRequest};
use super::speakers::{is_generic_label, SpeakerReconciler};
use super::windows::{plan_windows, Window};
use super::{RateGate, TranscriptionProvider};
use crate::config::TranscriptionSettings;
use crate::error::{HarkError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Windows a slice, transcribes the windows in order with rolling
/// context, and merges the results into one timeline.
pub struct ChunkedTranscriber {
    provider: Arc<dyn TranscriptionProvider>,
    rate_gate: Arc<RateGate>,
    settings: TranscriptionSettings,
    bytes_per_second: u64,
}

impl ChunkedTranscriber {
    pub fn new(
        provider: Arc<dyn TranscriptionProvider>,
        rate_gate: Arc<RateGate>,
        settings: TranscriptionSettings,
        bytes_per_second: u64,
    ) -> Self {
        Self {
            provider,
            rate_gate,
            settings,
            bytes_per_second,
        }
    }

    /// Transcribe one audio slice into a merged result.
    ///
    /// Windows run strictly sequentially: each call carries the context
    /// produced by the previous window, which is what keeps speaker labels
    /// and narrative continuity coherent across a multi-hour recording. A
    /// window that fails after bounded retries is skipped and its context
    /// update simply never happens; a rate-limit trips the shared gate and
    /// aborts the slice so it can be retried wholesale after the cooldown.
    ///
    /// Returns the merged result together with the updated context. The
    /// passed context is not mutated, so a failed slice leaves no trace.
    #[instrument(skip_all, fields(bytes = slice.len(), duration = %format!("{:.0}s", slice_duration_secs)))]
    pub async fn transcribe(
        &self,
        slice: &[u8],
        slice_duration_secs: f64,
        base_offset_secs: f64,
        roster: &[String],
        context: &TranscriptionContext,
    ) -> Result<(MergedResult, TranscriptionContext)> {
        let windows = plan_windows(
            slice.len(),
            slice_duration_secs,
            self.settings.window_seconds,
            self.bytes_per_second,
        );
        debug!("Planned {} window(s)", windows.len());

        let mut context = context.clone();
        let mut reconciler = SpeakerReconciler::new(roster);
        let mut utterances: Vec<Utterance> = Vec::new();
        let mut language: Option<String> = None;
        let mut language_confidence: Option<f64> = None;
        let mut last_end = base_offset_secs;

        for window in &windows {
            let request = WindowRequest {
                language_hints: self.settings.language_hints.clone(),
                context_prompt: context.to_prompt(),
                duration_hint_secs: window.duration_secs,
            };

            let raw = match self
                .call_with_retries(&slice[window.byte_start..window.byte_end], &request)
                .await
            {
                Ok(raw) => raw,
                Err(HarkError::RateLimited { retry_after_secs }) => {
                    self.rate_gate.trip(Duration::from_secs(retry_after_secs));
                    warn!(
                        "Provider rate limited at window {}, aborting slice for retry",
                        window.index
                    );
                    return Err(HarkError::RateLimited { retry_after_secs });
                }
                Err(e) => {
                    warn!(
                        "Window {} at {:.0}s failed after retries, skipping: {}",
                        window.index, window.start_secs, e
                    );
                    continue;
                }
            };

            if let Some(lang) = raw.language.clone() {
                language = Some(lang);
                language_confidence = raw.language_confidence;
            }

            let window_utterances = if raw.has_valid_shape() {
                raw.utterances
            } else {
                // Best-effort fallback: one utterance spanning the window.
                warn!(
                    "Window {} returned an invalid shape, using single-utterance fallback",
                    window.index
                );
                match raw.full_text.filter(|t| !t.trim().is_empty()) {
                    Some(text) => vec![super::models::RawUtterance {
                        speaker: None,
                        text: text.trim().to_string(),
                        start_secs: 0.0,
                        end_secs: window.duration_secs,
                        confidence: None,
                    }],
                    None => Vec::new(),
                }
            };

            last_end = self.append_window(
                &mut utterances,
                &mut reconciler,
                window,
                base_offset_secs,
                last_end,
                window_utterances,
            );

            // Context updates only ride on successful windows.
            context.processed_secs += window.duration_secs;
            if let Some(last) = utterances.last() {
                context.last_speaker = Some(last.speaker.clone());
            }
            for u in &utterances {
                if !is_generic_label(Some(&u.speaker)) {
                    context.note_speaker(&u.speaker);
                }
            }
        }

        let merged = MergedResult::new(utterances, None, language, language_confidence);
        Ok((merged, context))
    }

    /// Shift one window's utterances onto the session timeline and append.
    ///
    /// Global timestamps are window-relative offsets shifted by the window
    /// start plus the slice's base offset, clamped so the merged sequence
    /// stays non-decreasing and non-overlapping across boundaries.
    fn append_window(
        &self,
        merged: &mut Vec<Utterance>,
        reconciler: &mut SpeakerReconciler,
        window: &Window,
        base_offset_secs: f64,
        mut last_end: f64,
        window_utterances: Vec<super::models::RawUtterance>,
    ) -> f64 {
        let shift = base_offset_secs + window.start_secs;

        for raw in window_utterances {
            let start = (raw.start_secs + shift).max(last_end);
            let end = (raw.end_secs + shift).max(start);
            last_end = end;

            merged.push(Utterance {
                speaker: reconciler.resolve(raw.speaker.as_deref()),
                text: raw.text,
                start_secs: start,
                end_secs: end,
                confidence: raw.confidence.unwrap_or(0.0),
            });
        }

        last_end
    }

    async fn call_with_retries(
        &self,
        audio: &[u8],
        request: &WindowRequest,
    ) -> Result<super::models::RawTranscription> {
        let mut attempt = 0;
        loop {
            match self.provider.transcribe_window(audio, request).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries_per_window => {
                    attempt += 1;
                    warn!("Provider call failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
