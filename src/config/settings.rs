//! Configuration settings for Tolk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub segmentation: SegmentationSettings,
    pub transcription: TranscriptionSettings,
    pub storage: StorageSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files (downloads, extracted audio).
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.tolk".to_string(),
            temp_dir: "/tmp/tolk".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Relative weight of each pipeline stage in the overall progress figure.
///
/// Weights must total 100; `validate` is checked when the pipeline is built
/// so a misconfigured file fails loudly instead of skewing progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeightSettings {
    pub download: u8,
    pub audio_extraction: u8,
    pub transcription: u8,
    pub segmentation: u8,
}

impl Default for StageWeightSettings {
    fn default() -> Self {
        Self {
            download: 20,
            audio_extraction: 15,
            transcription: 50,
            segmentation: 15,
        }
    }
}

impl StageWeightSettings {
    /// Sum of all stage weights.
    pub fn total(&self) -> u32 {
        self.download as u32
            + self.audio_extraction as u32
            + self.transcription as u32
            + self.segmentation as u32
    }

    /// Check that the weights total 100.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.total() != 100 {
            return Err(crate::error::TolkError::Config(format!(
                "stage weights must total 100, got {}",
                self.total()
            )));
        }
        Ok(())
    }
}

/// Job pipeline settings: retry ceilings and backoff schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-stage progress weights.
    pub stage_weights: StageWeightSettings,
    /// Default retry ceiling for new jobs.
    pub max_retries: u32,
    /// Backoff schedule (seconds) for transient network failures.
    pub transient_backoff_seconds: Vec<u64>,
    /// Backoff schedule (seconds) for resource-exhaustion failures.
    pub resource_backoff_seconds: Vec<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_weights: StageWeightSettings::default(),
            max_retries: 3,
            transient_backoff_seconds: vec![10, 30, 60],
            resource_backoff_seconds: vec![60, 300, 900],
        }
    }
}

/// Segmentation stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Maximum character length of a persisted segment; longer raw segments
    /// are split.
    pub max_segment_chars: usize,
    /// Report progress after every N source segments processed.
    pub progress_report_interval: usize,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            max_segment_chars: 500,
            progress_report_interval: 25,
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model to use.
    pub model: String,
    /// Duration in seconds for splitting long audio files.
    pub chunk_duration_seconds: u32,
    /// Maximum concurrent chunk transcriptions.
    pub max_concurrent_chunks: usize,
    /// Language hint passed to the transcription service (None = autodetect).
    pub language: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            chunk_duration_seconds: 120,
            max_concurrent_chunks: 3,
            language: None,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.tolk/tolk.db".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TolkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tolk")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_total_100() {
        let weights = StageWeightSettings::default();
        assert_eq!(weights.total(), 100);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_unbalanced_weights_rejected() {
        let weights = StageWeightSettings {
            download: 50,
            audio_extraction: 50,
            transcription: 50,
            segmentation: 15,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.pipeline.max_retries, settings.pipeline.max_retries);
        assert_eq!(
            parsed.segmentation.max_segment_chars,
            settings.segmentation.max_segment_chars
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Settings = toml::from_str("[pipeline]\nmax_retries = 5\n").unwrap();
        assert_eq!(parsed.pipeline.max_retries, 5);
        assert_eq!(parsed.segmentation.max_segment_chars, 500);
        assert_eq!(parsed.pipeline.stage_weights.transcription, 50);
    }
}
