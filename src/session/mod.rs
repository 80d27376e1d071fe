//! Session state and live fan-out for Hark.
//!
//! One mutable session exists per bot for its entire registry membership.
//! All segment mutation funnels through `append_result`, which serializes
//! per session, keeps aggregates consistent, and pushes deltas to every
//! registered subscriber with partial-failure isolation.

mod events;

pub use events::{ChannelSubscriber, DeliveryError, SessionEvent, Subscriber};

use crate::error::{HarkError, Result};
use crate::metadata::MeetingInfo;
use crate::registry::BotHandle;
use crate::transcription::{MergedResult, TranscriptionContext};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session id for an entity, derived deterministically so restarts and
/// callers agree without coordination.
pub fn session_id_for(entity_id: &str) -> String {
    format!("sess_{}", entity_id)
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

/// One attributed utterance appended to a session. Immutable.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSegment {
    /// Strictly increasing sequence number, unique within the session.
    pub sequence: u64,
    pub speaker: String,
    pub text: String,
    /// Start time in seconds, relative to session start.
    pub start_secs: f64,
    /// End time in seconds, relative to session start.
    pub end_secs: f64,
    pub confidence: f64,
}

/// Derived aggregates maintained on every append.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionAggregates {
    pub word_count: usize,
    /// Max segment end-time seen, in seconds.
    pub duration_secs: f64,
    /// Distinct speakers, first-seen order.
    pub speakers: Vec<String>,
    pub detected_language: String,
    pub language_confidence: f64,
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub entity_id: String,
    pub status: SessionStatus,
    pub segment_count: usize,
    pub aggregates: SessionAggregates,
    pub metadata: MeetingInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handle returned from `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberHandle {
    pub session_id: String,
    id: Uuid,
}

struct Registration {
    id: Uuid,
    subscriber: Arc<dyn Subscriber>,
}

struct SessionState {
    status: SessionStatus,
    segments: Vec<TranscriptSegment>,
    next_sequence: u64,
    aggregates: SessionAggregates,
    context: TranscriptionContext,
    metadata: MeetingInfo,
    subscribers: Vec<Registration>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// One session's mutable state behind a per-session mutex, so concurrent
/// completions for the same session serialize instead of interleaving.
struct Session {
    session_id: String,
    entity_id: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            entity_id: self.entity_id.clone(),
            status: state.status,
            segment_count: state.segments.len(),
            aggregates: state.aggregates.clone(),
            metadata: state.metadata.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// Owner of all sessions: an active index keyed by session id plus a
/// completed index retained for read-only access after stop.
#[derive(Default)]
pub struct SessionStore {
    active: DashMap<String, Arc<Session>>,
    completed: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a bot. Idempotent: an existing active session
    /// for the entity is left untouched.
    pub fn create_session(&self, handle: &BotHandle) -> String {
        let session_id = session_id_for(&handle.id);
        if self.active.contains_key(&session_id) {
            return session_id;
        }

        let now = Utc::now();
        let session = Arc::new(Session {
            session_id: session_id.clone(),
            entity_id: handle.id.clone(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                segments: Vec::new(),
                next_sequence: 0,
                aggregates: SessionAggregates {
                    detected_language: "unknown".to_string(),
                    ..Default::default()
                },
                context: TranscriptionContext::default(),
                metadata: MeetingInfo::placeholder(&handle.meeting_url),
                subscribers: Vec::new(),
                created_at: now,
                updated_at: now,
            }),
        });

        info!("Created session {} for bot {}", session_id, handle.id);
        self.active.insert(session_id.clone(), session);
        session_id
    }

    /// Attach descriptive metadata fetched after creation. No-op once the
    /// session is stopped.
    pub fn set_metadata(&self, session_id: &str, metadata: MeetingInfo) {
        if let Some(session) = self.active.get(session_id) {
            let mut state = session.state.lock();
            if state.status == SessionStatus::Active {
                state.metadata = metadata;
                state.updated_at = Utc::now();
            }
        }
    }

    /// Participant roster for speaker reconciliation.
    pub fn roster(&self, session_id: &str) -> Vec<String> {
        self.active
            .get(session_id)
            .map(|s| s.state.lock().metadata.participants.clone())
            .unwrap_or_default()
    }

    /// Current rolling transcription context for the session.
    pub fn context(&self, session_id: &str) -> Option<TranscriptionContext> {
        self.active
            .get(session_id)
            .map(|s| s.state.lock().context.clone())
    }

    /// Append a merged transcription result to a session.
    ///
    /// The only mutator of segment state: assigns sequence numbers,
    /// updates aggregates, persists the updated context, then fans the
    /// delta out to current subscribers before returning. A stopped
    /// session makes this a no-op (late completions discard silently).
    pub fn append_result(
        &self,
        session_id: &str,
        result: MergedResult,
        context: TranscriptionContext,
    ) -> Result<usize> {
        let session = self
            .active
            .get(session_id)
            .map(|s| s.clone())
            .or_else(|| self.completed.get(session_id).map(|s| s.clone()))
            .ok_or_else(|| HarkError::UnknownSession(session_id.to_string()))?;

        let mut state = session.state.lock();
        if state.status == SessionStatus::Stopped {
            debug!("Discarding append for stopped session {}", session_id);
            return Ok(0);
        }

        let mut appended = Vec::with_capacity(result.utterances.len());
        for u in result.utterances {
            let segment = TranscriptSegment {
                sequence: state.next_sequence,
                speaker: u.speaker,
                text: u.text,
                start_secs: u.start_secs,
                end_secs: u.end_secs,
                confidence: u.confidence,
            };
            state.next_sequence += 1;
            appended.push(segment);
        }

        // The context advances even when the slice produced no segments:
        // silence still counts as processed audio, and dropping the update
        // here would make future provider prompts undercount it.
        state.context = context;
        state.updated_at = Utc::now();

        if appended.is_empty() {
            return Ok(0);
        }

        state.aggregates.word_count += result.word_count;
        for segment in &appended {
            if state.aggregates.duration_secs < segment.end_secs {
                state.aggregates.duration_secs = segment.end_secs;
            }
            if !state.aggregates.speakers.iter().any(|s| s == &segment.speaker) {
                state.aggregates.speakers.push(segment.speaker.clone());
            }
        }
        if result.detected_language != "unknown" {
            state.aggregates.detected_language = result.detected_language;
            state.aggregates.language_confidence = result.language_confidence;
        }

        state.segments.extend(appended.iter().cloned());

        let event = SessionEvent::SegmentsAppended {
            session_id: session_id.to_string(),
            segments: appended.clone(),
            aggregates: state.aggregates.clone(),
        };
        Self::fan_out(session_id, &mut state.subscribers, &event);

        Ok(appended.len())
    }

    /// Register a subscriber; an immediate snapshot event precedes any
    /// future deltas.
    pub fn subscribe(
        &self,
        session_id: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriberHandle> {
        let session = self
            .active
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| HarkError::UnknownSession(session_id.to_string()))?;

        let handle = SubscriberHandle {
            session_id: session_id.to_string(),
            id: Uuid::new_v4(),
        };

        // Snapshot and registration happen under one lock so no delta can
        // slip between the snapshot and the first delivered event.
        let mut state = session.state.lock();
        let snapshot = SessionSnapshot {
            session_id: session.session_id.clone(),
            entity_id: session.entity_id.clone(),
            status: state.status,
            segment_count: state.segments.len(),
            aggregates: state.aggregates.clone(),
            metadata: state.metadata.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        };
        if subscriber
            .deliver(&SessionEvent::Snapshot { session: snapshot })
            .is_err()
        {
            // Dead on arrival; don't register it at all.
            return Ok(handle);
        }
        state.subscribers.push(Registration {
            id: handle.id,
            subscriber,
        });

        Ok(handle)
    }

    /// Remove one subscriber registration. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) {
        if let Some(session) = self.active.get(&handle.session_id) {
            session.state.lock().subscribers.retain(|r| r.id != handle.id);
        }
    }

    /// Stop a session: flip status, emit the terminal event, clear all
    /// subscriber registrations, and move the session to the completed
    /// index. Idempotent.
    pub fn stop_session(&self, session_id: &str) {
        let Some((_, session)) = self.active.remove(session_id) else {
            return;
        };

        {
            let mut state = session.state.lock();
            state.status = SessionStatus::Stopped;
            state.updated_at = Utc::now();

            let event = SessionEvent::Stopped {
                session_id: session_id.to_string(),
            };
            Self::fan_out(session_id, &mut state.subscribers, &event);
            state.subscribers.clear();
        }

        info!("Stopped session {}", session_id);
        self.completed.insert(session_id.to_string(), session);
    }

    /// Deliver one event to every registration, dropping the ones that
    /// fail. One subscriber failing never affects the others.
    fn fan_out(session_id: &str, subscribers: &mut Vec<Registration>, event: &SessionEvent) {
        subscribers.retain(|r| match r.subscriber.deliver(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping subscriber on {}: {}", session_id, e);
                false
            }
        });
    }

    /// Read-only view of a session, active or completed.
    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.active
            .get(session_id)
            .or_else(|| self.completed.get(session_id))
            .map(|s| s.snapshot())
    }

    /// Current aggregates for a session, active or completed.
    pub fn aggregates(&self, session_id: &str) -> Option<SessionAggregates> {
        self.active
            .get(session_id)
            .or_else(|| self.completed.get(session_id))
            .map(|s| s.state.lock().aggregates.clone())
    }

    /// Session ids currently active.
    pub fn active_session_ids(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether the entity currently has an active session.
    pub fn is_active(&self, entity_id: &str) -> bool {
        self.active.contains_key(&session_id_for(entity_id))
    }

    /// Number of subscribers currently registered on a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.active
            .get(session_id)
            .map(|s| s.state.lock().subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::Utterance;

    fn handle(id: &str) -> BotHandle {
        BotHandle::new(id, format!("legacy-{id}"), format!("https://meet/{id}"))
    }

    fn merged(utterances: Vec<(&str, &str, f64, f64)>) -> MergedResult {
        MergedResult::new(
            utterances
                .into_iter()
                .map(|(speaker, text, start, end)| Utterance {
                    speaker: speaker.to_string(),
                    text: text.to_string(),
                    start_secs: start,
                    end_secs: end,
                    confidence: 0.9,
                })
                .collect(),
            None,
            Some("en".to_string()),
            Some(0.9),
        )
    }

    /// Subscriber fake that records events and can be told to fail.
    struct RecordingSubscriber {
        events: Mutex<Vec<SessionEvent>>,
        fail: bool,
    }

    impl RecordingSubscriber {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn event_count(&self) -> usize {
            self.events.lock().len()
        }
    }

    impl Subscriber for RecordingSubscriber {
        fn deliver(&self, event: &SessionEvent) -> std::result::Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError("forced failure".into()));
            }
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_create_session_is_idempotent() {
        let store = SessionStore::new();
        let first = store.create_session(&handle("b1"));
        let second = store.create_session(&handle("b1"));
        assert_eq!(first, second);
        assert_eq!(store.active_session_ids().len(), 1);
    }

    #[test]
    fn test_append_assigns_increasing_sequences_and_aggregates() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        store
            .append_result(
                &sid,
                merged(vec![("Ada", "hello world", 0.0, 2.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();
        store
            .append_result(
                &sid,
                merged(vec![("Grace", "hi there again", 2.0, 5.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();

        let snapshot = store.get(&sid).unwrap();
        assert_eq!(snapshot.segment_count, 2);
        assert_eq!(snapshot.aggregates.word_count, 5);
        assert_eq!(snapshot.aggregates.duration_secs, 5.0);
        assert_eq!(snapshot.aggregates.speakers, vec!["Ada", "Grace"]);
        assert_eq!(snapshot.aggregates.detected_language, "en");
    }

    #[test]
    fn test_append_on_stopped_session_is_noop() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));
        store.stop_session(&sid);

        let appended = store
            .append_result(
                &sid,
                merged(vec![("Ada", "late", 0.0, 1.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();
        assert_eq!(appended, 0);
        assert_eq!(store.get(&sid).unwrap().segment_count, 0);
    }

    #[test]
    fn test_unknown_session_append_errors() {
        let store = SessionStore::new();
        let result = store.append_result(
            "sess_nope",
            merged(vec![]),
            TranscriptionContext::default(),
        );
        assert!(matches!(result, Err(HarkError::UnknownSession(_))));
    }

    #[test]
    fn test_subscribe_sends_snapshot_first() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let sub = RecordingSubscriber::new(false);
        store.subscribe(&sid, sub.clone()).unwrap();

        let events = sub.events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Snapshot { .. }));
    }

    #[test]
    fn test_subscriber_failing_the_snapshot_is_never_registered() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let dead = RecordingSubscriber::new(true);
        store.subscribe(&sid, dead).unwrap();
        assert_eq!(store.subscriber_count(&sid), 0);
    }

    #[test]
    fn test_failing_subscriber_is_isolated_and_removed() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        // Three subscribers; the middle one accepts the snapshot but
        // fails every delta.
        let ok1 = RecordingSubscriber::new(false);
        let flaky = FlakySubscriber::new();
        let ok2 = RecordingSubscriber::new(false);
        store.subscribe(&sid, ok1.clone()).unwrap();
        store.subscribe(&sid, flaky.clone()).unwrap();
        store.subscribe(&sid, ok2.clone()).unwrap();

        assert_eq!(store.subscriber_count(&sid), 3);

        store
            .append_result(
                &sid,
                merged(vec![("Ada", "hello", 0.0, 1.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();

        // Snapshot + delta for the healthy ones, flaky dropped.
        assert_eq!(ok1.event_count(), 2);
        assert_eq!(ok2.event_count(), 2);
        assert_eq!(store.subscriber_count(&sid), 2);

        // Subsequent appends no longer attempt the dropped subscriber.
        store
            .append_result(
                &sid,
                merged(vec![("Ada", "again", 1.0, 2.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();
        assert_eq!(flaky.delta_attempts(), 1);
    }

    /// Accepts the snapshot, fails every delta.
    struct FlakySubscriber {
        deltas: Mutex<usize>,
    }

    impl FlakySubscriber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deltas: Mutex::new(0),
            })
        }

        fn delta_attempts(&self) -> usize {
            *self.deltas.lock()
        }
    }

    impl Subscriber for FlakySubscriber {
        fn deliver(&self, event: &SessionEvent) -> std::result::Result<(), DeliveryError> {
            match event {
                SessionEvent::Snapshot { .. } => Ok(()),
                _ => {
                    *self.deltas.lock() += 1;
                    Err(DeliveryError("forced failure".into()))
                }
            }
        }
    }

    #[test]
    fn test_stop_emits_terminal_event_and_clears_subscribers() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let sub = RecordingSubscriber::new(false);
        store.subscribe(&sid, sub.clone()).unwrap();
        store.stop_session(&sid);

        let events = sub.events.lock();
        assert!(matches!(events.last(), Some(SessionEvent::Stopped { .. })));

        assert!(!store.is_active("b1"));
        assert!(store.active_session_ids().is_empty());
        // Still readable from the completed index.
        assert_eq!(store.get(&sid).unwrap().status, SessionStatus::Stopped);
    }

    #[test]
    fn test_aggregates_survive_stop() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        store
            .append_result(
                &sid,
                merged(vec![("Ada", "one two three", 0.0, 3.0)]),
                TranscriptionContext::default(),
            )
            .unwrap();
        store.stop_session(&sid);

        let aggregates = store.aggregates(&sid).unwrap();
        assert_eq!(aggregates.word_count, 3);
        assert_eq!(aggregates.duration_secs, 3.0);
    }

    #[test]
    fn test_unsubscribe_removes_registration() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let sub = RecordingSubscriber::new(false);
        let handle = store.subscribe(&sid, sub).unwrap();
        assert_eq!(store.subscriber_count(&sid), 1);

        store.unsubscribe(&handle);
        assert_eq!(store.subscriber_count(&sid), 0);
    }

    #[test]
    fn test_empty_append_still_persists_context() {
        // A silent slice transcribes to nothing but was still processed;
        // the rolling context must reflect that.
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let mut ctx = TranscriptionContext::default();
        ctx.processed_secs = 300.0;

        let appended = store.append_result(&sid, merged(vec![]), ctx).unwrap();
        assert_eq!(appended, 0);
        assert_eq!(store.context(&sid).unwrap().processed_secs, 300.0);
    }

    #[test]
    fn test_context_roundtrip() {
        let store = SessionStore::new();
        let sid = store.create_session(&handle("b1"));

        let mut ctx = TranscriptionContext::default();
        ctx.processed_secs = 120.0;
        ctx.last_speaker = Some("Ada".to_string());

        store
            .append_result(&sid, merged(vec![("Ada", "hi", 0.0, 1.0)]), ctx)
            .unwrap();

        let stored = store.context(&sid).unwrap();
        assert_eq!(stored.processed_secs, 120.0);
        assert_eq!(stored.last_speaker.as_deref(), Some("Ada"));
    }
}
