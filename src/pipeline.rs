//! Pipeline coordination for Hark.
//!
//! A single timer loop drives registry polling; every cycle reconciles
//! session lifecycles against the registry diff, then fans out one
//! acquisition-and-transcription task per live bot. Tasks run
//! concurrently across bots but strictly single-flight within one bot.

use crate::acquisition::{Acquirer, AcquisitionResult, AudioFetcher, HttpAudioFetcher};
use crate::config::Settings;
use crate::error::{HarkError, Result};
use crate::metadata::{HttpMetadataService, MetadataService, NoMetadataService};
use crate::registry::{BotHandle, HttpRegistryClient, Reconciler, RegistryClient, RegistryDiff};
use crate::session::{session_id_for, SessionStore};
use crate::transcription::{ChunkedTranscriber, OpenAiProvider, RateGate, TranscriptionProvider};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

/// The coordinating pipeline: reconciler, acquirer, transcriber, and
/// session store wired together behind one polling loop.
pub struct Pipeline {
    settings: Settings,
    reconciler: tokio::sync::Mutex<Reconciler>,
    acquirer: Arc<Acquirer>,
    transcriber: Arc<ChunkedTranscriber>,
    rate_gate: Arc<RateGate>,
    sessions: Arc<SessionStore>,
    metadata: Arc<dyn MetadataService>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    force: Notify,
}

impl Pipeline {
    /// Create a pipeline with the default HTTP collaborators.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let registry: Arc<dyn RegistryClient> = Arc::new(HttpRegistryClient::new(
            &settings.registry.base_url,
            Duration::from_secs(settings.registry.request_timeout_seconds),
        )?);

        let fetcher: Arc<dyn AudioFetcher> = Arc::new(HttpAudioFetcher::new(
            &settings.acquisition.base_url,
            Duration::from_secs(settings.acquisition.request_timeout_seconds),
        )?);

        let provider: Arc<dyn TranscriptionProvider> = Arc::new(OpenAiProvider::new(
            &settings.transcription.model,
            settings.transcription.rate_limit_cooldown_seconds,
        ));

        let metadata: Arc<dyn MetadataService> = if settings.session.metadata_base_url.is_empty() {
            Arc::new(NoMetadataService)
        } else {
            Arc::new(HttpMetadataService::new(
                &settings.session.metadata_base_url,
                Duration::from_secs(settings.session.metadata_timeout_seconds),
            )?)
        };

        Self::with_components(settings, registry, fetcher, provider, metadata)
    }

    /// Create a pipeline with custom collaborators (fakes in tests, or a
    /// different provider in production).
    pub fn with_components(
        settings: Settings,
        registry: Arc<dyn RegistryClient>,
        fetcher: Arc<dyn AudioFetcher>,
        provider: Arc<dyn TranscriptionProvider>,
        metadata: Arc<dyn MetadataService>,
    ) -> Result<Self> {
        settings.validate()?;

        let rate_gate = Arc::new(RateGate::new());

        Ok(Self {
            reconciler: tokio::sync::Mutex::new(Reconciler::new(
                registry,
                settings.registry.clone(),
            )),
            acquirer: Arc::new(Acquirer::new(fetcher, settings.acquisition.clone())),
            transcriber: Arc::new(ChunkedTranscriber::new(
                provider,
                rate_gate.clone(),
                settings.transcription.clone(),
                settings.acquisition.bytes_per_second,
            )),
            rate_gate,
            sessions: Arc::new(SessionStore::new()),
            metadata,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            force: Notify::new(),
            settings,
        })
    }

    /// The session store, for callers exposing queries and subscriptions.
    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    /// Trigger a poll ahead of the normal schedule.
    pub fn force_poll(&self) {
        self.force.notify_one();
    }

    /// Run the polling loop until the task is dropped.
    ///
    /// The next poll waits the configured interval plus any registry
    /// failure backoff; a force trigger cuts the wait short.
    pub async fn run(&self) {
        info!(
            "Pipeline running, polling registry every {}s",
            self.settings.registry.poll_interval_seconds
        );

        loop {
            self.poll_cycle().await;

            let mut delay = Duration::from_secs(self.settings.registry.poll_interval_seconds);
            if let Some(backoff) = self.reconciler.lock().await.backoff_delay() {
                delay += backoff;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.force.notified() => {
                    debug!("Force poll requested");
                }
            }
        }
    }

    /// One poll cycle: reconcile the registry, drive session lifecycles,
    /// and schedule per-bot work.
    #[instrument(skip(self))]
    pub async fn poll_cycle(&self) {
        let diff = self.reconciler.lock().await.poll().await;
        self.apply_diff(&diff);

        for handle in diff.current {
            self.spawn_bot_task(handle);
        }
    }

    fn apply_diff(&self, diff: &RegistryDiff) {
        for entity_id in &diff.left {
            info!("Bot {} left, stopping session", entity_id);
            self.sessions.stop_session(&session_id_for(entity_id));
            self.acquirer.forget(entity_id);
        }

        for handle in &diff.entered {
            let session_id = self.sessions.create_session(handle);
            self.spawn_metadata_fetch(handle.id.clone(), session_id);
        }
    }

    /// Best-effort metadata fetch, off the poll path so a slow lookup
    /// never blocks session creation.
    fn spawn_metadata_fetch(&self, entity_id: String, session_id: String) {
        let metadata = self.metadata.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            match metadata.meeting_info(&entity_id).await {
                Ok(info) => sessions.set_metadata(&session_id, info),
                Err(e) => debug!("Metadata lookup for {} failed: {}", entity_id, e),
            }
        });
    }

    /// Schedule acquisition-and-transcription for one bot, unless a task
    /// for it is still in flight (skipped, not queued) or the provider
    /// cooldown is active.
    fn spawn_bot_task(&self, handle: BotHandle) {
        if !self.sessions.is_active(&handle.id) {
            return;
        }
        if self.rate_gate.is_blocked() {
            debug!("Provider cooldown active, skipping {} this cycle", handle.id);
            return;
        }
        if !self.in_flight.lock().insert(handle.id.clone()) {
            debug!("Task for {} still in flight, skipping this cycle", handle.id);
            return;
        }

        let worker = BotWorker {
            acquirer: self.acquirer.clone(),
            transcriber: self.transcriber.clone(),
            sessions: self.sessions.clone(),
            named_speakers: self.settings.session.named_speakers,
        };
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            entity_id: handle.id.clone(),
        };

        tokio::spawn(async move {
            let _guard = guard;
            worker.process(&handle).await;
        });
    }

    /// Whether any per-bot task is currently running. Used by callers
    /// that want to drain before shutdown, and by tests.
    pub fn has_work_in_flight(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }
}

/// Clears the single-flight marker when the task ends, including by
/// panic; a wedged marker would skip the bot on every future cycle.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    entity_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.entity_id);
    }
}

/// The per-bot slice of the pipeline a spawned task needs.
struct BotWorker {
    acquirer: Arc<Acquirer>,
    transcriber: Arc<ChunkedTranscriber>,
    sessions: Arc<SessionStore>,
    named_speakers: bool,
}

impl BotWorker {
    /// Acquire new audio for one bot, transcribe it, and append to its
    /// session. Every failure class degrades to skipping this cycle.
    async fn process(&self, handle: &BotHandle) {
        let acquisition = match self.acquirer.fetch(handle).await {
            Ok(Some(acquisition)) => acquisition,
            Ok(None) => return,
            Err(e) if e.is_permanent_for_cycle() => {
                warn!("Skipping {} this cycle: {}", handle.id, e);
                return;
            }
            Err(e) => {
                warn!("Acquisition for {} failed: {}", handle.id, e);
                return;
            }
        };

        self.transcribe_and_append(handle, acquisition).await;
    }

    async fn transcribe_and_append(&self, handle: &BotHandle, acquisition: AcquisitionResult) {
        let session_id = session_id_for(&handle.id);
        let Some(context) = self.sessions.context(&session_id) else {
            // Session stopped between fetch and transcription.
            return;
        };

        let roster = if self.named_speakers {
            self.sessions.roster(&session_id)
        } else {
            Vec::new()
        };

        let outcome = self
            .transcriber
            .transcribe(
                &acquisition.slice,
                acquisition.slice_duration_secs,
                acquisition.base_offset_secs,
                &roster,
                &context,
            )
            .await;

        match outcome {
            Ok((merged, updated_context)) => {
                let produced = merged.utterances.len();
                match self.sessions.append_result(&session_id, merged, updated_context) {
                    Ok(appended) => {
                        // Only now does the content count as processed;
                        // dedup keys on processed, not fetched.
                        if self.sessions.is_active(&handle.id) {
                            self.acquirer.mark_processed(&handle.id, &acquisition.snapshot);
                        }
                        if appended > 0 {
                            debug!("Appended {} segment(s) to {}", appended, session_id);
                        } else if produced > 0 {
                            debug!("Discarded {} segment(s) for stopped {}", produced, session_id);
                        }
                    }
                    Err(e) => warn!("Append to {} failed: {}", session_id, e),
                }
            }
            Err(HarkError::RateLimited { retry_after_secs }) => {
                warn!(
                    "Provider rate limited, pausing all transcription for {}s",
                    retry_after_secs
                );
            }
            Err(e) => warn!("Transcription for {} failed: {}", handle.id, e),
        }
    }
}
