//! Configuration module for Tolk.
//!
//! Handles loading and managing application settings.

mod settings;

pub use settings::{
    GeneralSettings, PipelineSettings, SegmentationSettings, Settings, StageWeightSettings,
    StorageSettings, TranscriptionSettings,
};
