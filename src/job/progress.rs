//! Per-stage progress tracking and weighted aggregation.

use super::PipelineStage;
use crate::config::StageWeightSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress reported so far for each pipeline stage, keyed by stage.
///
/// Values are clamped to `[0, 100]` on write. A stage that has never
/// reported contributes nothing to the weighted aggregate. The map is
/// encoded as JSON at the persistence boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    values: BTreeMap<PipelineStage, f32>,
}

impl StageProgress {
    /// Create an empty progress map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress for a stage, clamping the value to `[0, 100]`.
    ///
    /// Setting the same value twice is a no-op beyond the first write.
    pub fn set(&mut self, stage: PipelineStage, value: f32) {
        self.values.insert(stage, value.clamp(0.0, 100.0));
    }

    /// Progress reported for a stage, if any.
    pub fn get(&self, stage: PipelineStage) -> Option<f32> {
        self.values.get(&stage).copied()
    }

    /// True if no stage has reported progress yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Weighted overall progress, rounded to the nearest integer.
    ///
    /// Each weighted stage contributes `value / 100 * weight`; the weights
    /// total 100 so a fully completed pipeline reports exactly 100.
    pub fn overall(&self, weights: &StageWeightSettings) -> u8 {
        if self.values.is_empty() {
            return 0;
        }

        let total: f64 = PipelineStage::WEIGHTED
            .iter()
            .filter_map(|stage| {
                self.get(*stage)
                    .map(|v| (v as f64 / 100.0) * stage_weight(weights, *stage) as f64)
            })
            .sum();

        total.round().clamp(0.0, 100.0) as u8
    }
}

/// Configured weight of a single stage.
///
/// `Completed` is a bookkeeping stage and carries no weight.
pub fn stage_weight(weights: &StageWeightSettings, stage: PipelineStage) -> u8 {
    match stage {
        PipelineStage::Download => weights.download,
        PipelineStage::AudioExtraction => weights.audio_extraction,
        PipelineStage::Transcription => weights.transcription,
        PipelineStage::Segmentation => weights.segmentation,
        PipelineStage::Completed => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> StageWeightSettings {
        StageWeightSettings::default()
    }

    #[test]
    fn test_empty_progress_is_zero() {
        let progress = StageProgress::new();
        assert_eq!(progress.overall(&weights()), 0);
    }

    #[test]
    fn test_set_clamps_out_of_range_values() {
        let mut progress = StageProgress::new();

        progress.set(PipelineStage::Download, -10.0);
        assert_eq!(progress.get(PipelineStage::Download), Some(0.0));

        progress.set(PipelineStage::Download, 150.0);
        assert_eq!(progress.get(PipelineStage::Download), Some(100.0));
    }

    #[test]
    fn test_all_stages_complete_is_100() {
        let mut progress = StageProgress::new();
        for stage in PipelineStage::WEIGHTED {
            progress.set(stage, 100.0);
        }
        assert_eq!(progress.overall(&weights()), 100);
    }

    #[test]
    fn test_first_two_stages_complete_is_35() {
        let mut progress = StageProgress::new();
        progress.set(PipelineStage::Download, 100.0);
        progress.set(PipelineStage::AudioExtraction, 100.0);
        assert_eq!(progress.overall(&weights()), 35);
    }

    #[test]
    fn test_partial_stage_contributes_fraction() {
        let mut progress = StageProgress::new();
        progress.set(PipelineStage::Download, 100.0);
        progress.set(PipelineStage::Transcription, 50.0);
        // 20 + 25
        assert_eq!(progress.overall(&weights()), 45);
    }

    #[test]
    fn test_overall_is_monotonic_as_stages_complete() {
        let mut progress = StageProgress::new();
        let mut last = 0;
        for stage in PipelineStage::WEIGHTED {
            for value in [25.0, 50.0, 75.0, 100.0] {
                progress.set(stage, value);
                let overall = progress.overall(&weights());
                assert!(overall >= last, "progress went backwards at {stage:?}");
                assert!(overall <= 100);
                last = overall;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut progress = StageProgress::new();
        progress.set(PipelineStage::Transcription, 60.0);
        let first = progress.overall(&weights());
        progress.set(PipelineStage::Transcription, 60.0);
        assert_eq!(progress.get(PipelineStage::Transcription), Some(60.0));
        assert_eq!(progress.overall(&weights()), first);
    }

    #[test]
    fn test_map_json_roundtrip() {
        let mut progress = StageProgress::new();
        progress.set(PipelineStage::Download, 100.0);
        progress.set(PipelineStage::Transcription, 42.5);

        let encoded = serde_json::to_string(&progress).unwrap();
        let decoded: StageProgress = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, progress);
    }
}
