//! Hark - Live Meeting Transcription
//!
//! A service that follows meeting bots through an external registry and
//! turns the audio they capture into live, subscribable transcripts.
//!
//! The name "Hark" is the old English call to listen closely.
//!
//! # Overview
//!
//! Hark continuously:
//! - Polls a bot registry and reconciles which meetings are live
//! - Fetches each bot's accumulated audio and deduplicates by content
//! - Transcribes only new audio, in sequential windows with rolling context
//! - Maintains one session per meeting and fans segment deltas out to
//!   subscribers in real time
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `registry` - Bot registry client and reconciliation
//! - `acquisition` - Audio fetching, fingerprinting, and dedup
//! - `transcription` - Windowed transcription and speaker reconciliation
//! - `session` - Session state, aggregates, and live fan-out
//! - `metadata` - Meeting metadata lookup
//! - `pipeline` - The polling loop wiring it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use hark::config::Settings;
//! use hark::pipeline::Pipeline;
//! use hark::session::{ChannelSubscriber, session_id_for};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Arc::new(Pipeline::new(settings)?);
//!
//!     // Attach a live transcript feed once a bot has a session.
//!     let sessions = pipeline.sessions();
//!     let (subscriber, mut events) = ChannelSubscriber::new();
//!     let _handle = sessions.subscribe(&session_id_for("bot-1"), Arc::new(subscriber))?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{}", serde_json::to_string(&event).unwrap());
//!         }
//!     });
//!
//!     pipeline.run().await;
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod transcription;

pub use error::{HarkError, Result};
