//! Data models for chunked transcription.

use serde::{Deserialize, Serialize};

/// One utterance as returned by the external provider, before any
/// offset shifting or speaker reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUtterance {
    /// Speaker label as the provider reported it, if any.
    pub speaker: Option<String>,
    /// Utterance text.
    pub text: String,
    /// Start time in seconds, relative to the submitted window.
    pub start_secs: f64,
    /// End time in seconds, relative to the submitted window.
    pub end_secs: f64,
    /// Confidence score, if the provider supplies one.
    pub confidence: Option<f64>,
}

/// Structured provider output for one window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTranscription {
    /// Ordered utterances with window-relative timestamps.
    pub utterances: Vec<RawUtterance>,
    /// Detected language, if reported.
    pub language: Option<String>,
    /// Confidence in the language detection, if reported.
    pub language_confidence: Option<f64>,
    /// Full text, if the provider supplies it directly.
    pub full_text: Option<String>,
}

impl RawTranscription {
    /// Required shape: a non-empty ordered utterance list with sane
    /// start/end offsets. Invalid shapes trigger the single-utterance
    /// fallback in the engine.
    pub fn has_valid_shape(&self) -> bool {
        !self.utterances.is_empty()
            && self.utterances.iter().all(|u| {
                u.start_secs >= 0.0 && u.end_secs >= u.start_secs && u.start_secs.is_finite()
            })
    }
}

/// One attributed utterance in a session transcript. Immutable once
/// appended; sequence numbers are assigned by the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Speaker label after reconciliation.
    pub speaker: String,
    /// Utterance text.
    pub text: String,
    /// Start time in seconds, relative to session start.
    pub start_secs: f64,
    /// End time in seconds, relative to session start.
    pub end_secs: f64,
    /// Confidence score (0 when the provider gave none).
    pub confidence: f64,
}

/// Merged, time-shifted, speaker-reconciled result of transcribing one
/// audio slice (possibly across several windows).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    /// Ordered utterances with session-relative timestamps.
    pub utterances: Vec<Utterance>,
    /// Full text, provider-supplied or joined from utterances.
    pub full_text: String,
    /// Word count, provider-derived or whitespace-split from full text.
    pub word_count: usize,
    /// Detected language ("unknown" when the provider reported none).
    pub detected_language: String,
    /// Confidence in the detected language (0 when unreported).
    pub language_confidence: f64,
}

impl MergedResult {
    /// Build a merged result, deriving full text and word count from the
    /// utterances when not supplied.
    pub fn new(
        utterances: Vec<Utterance>,
        full_text: Option<String>,
        language: Option<String>,
        language_confidence: Option<f64>,
    ) -> Self {
        let full_text = full_text.unwrap_or_else(|| {
            utterances
                .iter()
                .map(|u| u.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });
        let word_count = full_text.split_whitespace().count();

        Self {
            utterances,
            full_text,
            word_count,
            detected_language: language.unwrap_or_else(|| "unknown".to_string()),
            language_confidence: language_confidence.unwrap_or(0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }
}

/// Rolling continuity state threaded through consecutive transcription
/// calls for the same entity. Mutated only by the transcription engine
/// after each successful window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionContext {
    /// Last speaker heard on the previous window.
    pub last_speaker: Option<String>,
    /// Cumulative audio duration already processed, in seconds.
    pub processed_secs: f64,
    /// Speaker labels already assigned, first-seen order.
    pub known_speakers: Vec<String>,
}

impl TranscriptionContext {
    /// Free-form continuity hint forwarded to the provider.
    pub fn to_prompt(&self) -> Option<String> {
        if self.last_speaker.is_none() && self.known_speakers.is_empty() && self.processed_secs == 0.0
        {
            return None;
        }

        let mut parts = Vec::new();
        if let Some(speaker) = &self.last_speaker {
            parts.push(format!("Previous speaker: {}.", speaker));
        }
        if self.processed_secs > 0.0 {
            parts.push(format!("Processed so far: {:.0}s.", self.processed_secs));
        }
        if !self.known_speakers.is_empty() {
            parts.push(format!("Speakers so far: {}.", self.known_speakers.join(", ")));
        }
        Some(parts.join(" "))
    }

    /// Record a speaker label, preserving first-seen order.
    pub fn note_speaker(&mut self, speaker: &str) {
        if !self.known_speakers.iter().any(|s| s == speaker) {
            self.known_speakers.push(speaker.to_string());
        }
    }
}

/// Request accompanying one window's audio to the provider.
#[derive(Debug, Clone, Default)]
pub struct WindowRequest {
    /// Language hints; providers taking a single hint use the first.
    pub language_hints: Vec<String>,
    /// Free-form rolling context from previous windows.
    pub context_prompt: Option<String>,
    /// Estimated duration of the submitted window, in seconds.
    pub duration_hint_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utt(speaker: &str, text: &str, start: f64, end: f64) -> Utterance {
        Utterance {
            speaker: speaker.to_string(),
            text: text.to_string(),
            start_secs: start,
            end_secs: end,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_merged_result_derives_text_and_count() {
        let result = MergedResult::new(
            vec![utt("Ada", "hello there", 0.0, 2.0), utt("Ada", "good morning", 2.0, 4.0)],
            None,
            None,
            None,
        );
        assert_eq!(result.full_text, "hello there good morning");
        assert_eq!(result.word_count, 4);
        assert_eq!(result.detected_language, "unknown");
        assert_eq!(result.language_confidence, 0.0);
    }

    #[test]
    fn test_merged_result_keeps_supplied_text() {
        let result = MergedResult::new(
            vec![utt("Ada", "hi", 0.0, 1.0)],
            Some("Hi.".to_string()),
            Some("en".to_string()),
            Some(0.95),
        );
        assert_eq!(result.full_text, "Hi.");
        assert_eq!(result.word_count, 1);
        assert_eq!(result.detected_language, "en");
    }

    #[test]
    fn test_shape_validation() {
        let mut raw = RawTranscription::default();
        assert!(!raw.has_valid_shape());

        raw.utterances.push(RawUtterance {
            speaker: None,
            text: "hi".into(),
            start_secs: 0.0,
            end_secs: 1.0,
            confidence: None,
        });
        assert!(raw.has_valid_shape());

        raw.utterances[0].end_secs = -1.0;
        assert!(!raw.has_valid_shape());
    }

    #[test]
    fn test_context_prompt() {
        let mut ctx = TranscriptionContext::default();
        assert!(ctx.to_prompt().is_none());

        ctx.last_speaker = Some("Ada".to_string());
        ctx.processed_secs = 300.0;
        ctx.note_speaker("Ada");
        ctx.note_speaker("Grace");
        ctx.note_speaker("Ada");

        let prompt = ctx.to_prompt().unwrap();
        assert!(prompt.contains("Previous speaker: Ada."));
        assert!(prompt.contains("300s"));
        assert!(prompt.contains("Ada, Grace"));
        assert_eq!(ctx.known_speakers.len(), 2);
    }
}
