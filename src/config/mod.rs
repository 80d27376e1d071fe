//! Configuration module for Hark.
//!
//! Handles loading and managing pipeline settings.

mod settings;

pub use settings::{
    AcquisitionSettings, GeneralSettings, RegistrySettings, SessionSettings, Settings,
    TranscriptionSettings,
};
