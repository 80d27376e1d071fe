//! OpenAI-backed transcription provider.
//!
//! Submits each window as a verbose-JSON transcription request, carrying
//! the rolling context through the prompt field. Whisper-style responses
//! have no speaker labels; reconciliation downstream fills those in from
//! the roster.

use super::models::{RawTranscription, RawUtterance, WindowRequest};
use super::TranscriptionProvider;
use crate::error::{HarkError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default timeout for provider requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Transcription provider over the OpenAI audio API.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    rate_limit_cooldown_secs: u64,
}

impl OpenAiProvider {
    pub fn new(model: &str, rate_limit_cooldown_secs: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        let client = Client::with_config(OpenAIConfig::default()).with_http_client(http_client);

        Self {
            client,
            model: model.to_string(),
            rate_limit_cooldown_secs,
        }
    }

    fn classify_error(&self, message: String) -> HarkError {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            HarkError::RateLimited {
                retry_after_secs: self.rate_limit_cooldown_secs,
            }
        } else {
            HarkError::Provider(message)
        }
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiProvider {
    async fn transcribe_window(
        &self,
        audio: &[u8],
        request: &WindowRequest,
    ) -> Result<RawTranscription> {
        debug!("Submitting {} bytes to {}", audio.len(), self.model);

        let mut builder = CreateTranscriptionRequestArgs::default();
        builder
            .file(async_openai::types::AudioInput::from_vec_u8(
                "window.wav".to_string(),
                audio.to_vec(),
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = request.language_hints.first() {
            builder.language(lang);
        }
        if let Some(prompt) = &request.context_prompt {
            builder.prompt(prompt);
        }

        let req = builder
            .build()
            .map_err(|e| HarkError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(req)
            .await
            .map_err(|e| self.classify_error(format!("{} API error: {}", self.model, e)))?;

        let utterances: Vec<RawUtterance> = response
            .segments
            .map(|segs| {
                segs.iter()
                    .map(|s| RawUtterance {
                        speaker: None,
                        text: s.text.trim().to_string(),
                        start_secs: s.start as f64,
                        end_secs: s.end as f64,
                        confidence: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(RawTranscription {
            utterances,
            language: Some(response.language).filter(|l| !l.is_empty()),
            language_confidence: None,
            full_text: Some(response.text.trim().to_string()),
        })
    }
}
