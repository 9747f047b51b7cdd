//! Segmentation stage: turns raw transcription output into persisted,
//! integrity-checked transcript segments.
//!
//! Oversized raw segments are split into roughly even character chunks over
//! the parent's time span, then the whole final list is re-indexed densely
//! before a full-replace bulk write.

mod validator;

pub use validator::{validate_segments, SoftViolation, ValidationReport};

use crate::config::SegmentationSettings;
use crate::error::{StageError, TolkError};
use crate::services::{ProgressSink, StageResult};
use crate::storage::{SegmentStore, VideoStatus, VideoStore};
use crate::transcript::{RawSegment, TranscriptSegment, TranscriptionResult};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Consumes a transcription result and persists final ordered segments.
pub struct SegmentationProcessor {
    segments: Arc<dyn SegmentStore>,
    videos: Arc<dyn VideoStore>,
    settings: SegmentationSettings,
}

impl SegmentationProcessor {
    pub fn new(
        segments: Arc<dyn SegmentStore>,
        videos: Arc<dyn VideoStore>,
        settings: SegmentationSettings,
    ) -> Self {
        Self {
            segments,
            videos,
            settings,
        }
    }

    /// Run segmentation for a video. Returns the number of persisted
    /// segments.
    ///
    /// Prior segments for the video are deleted before the new set is
    /// inserted (full replace). The video record is stamped Completed with a
    /// transcribed-at timestamp on success.
    #[instrument(skip(self, transcription, progress, cancel), fields(video_id = %video_id))]
    pub async fn run(
        &self,
        video_id: &str,
        transcription: &TranscriptionResult,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StageResult<usize> {
        let total = transcription.segments.len();
        let interval = self.settings.progress_report_interval.max(1);
        info!("Segmenting {} raw segments", total);

        let mut final_segments: Vec<TranscriptSegment> = Vec::with_capacity(total);

        for (i, raw) in transcription.segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            self.append_segments(video_id, raw, transcription.language.as_deref(), &mut final_segments);

            // Periodic progress, not per segment, to bound write volume
            if (i + 1) % interval == 0 {
                progress.report(((i + 1) as f32 / total.max(1) as f32) * 100.0);
            }
        }

        // Dense re-index across the entire final list, regardless of how
        // many splits occurred.
        for (index, segment) in final_segments.iter_mut().enumerate() {
            segment.segment_index = index as i32;
        }

        let report = validate_segments(video_id, &final_segments)?;
        for violation in &report.warnings {
            warn!("Segment quality issue for {}: {}", video_id, violation);
        }

        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let count = self
            .segments
            .replace_for_video(video_id, &final_segments)
            .await
            .map_err(storage_error)?;

        self.mark_video_completed(video_id).await?;

        progress.report(100.0);
        info!("Persisted {} segments for {}", count, video_id);
        Ok(count)
    }

    /// Split one raw segment if needed and append the results.
    fn append_segments(
        &self,
        video_id: &str,
        raw: &RawSegment,
        language: Option<&str>,
        out: &mut Vec<TranscriptSegment>,
    ) {
        let text = raw.text.trim();
        let max_chars = self.settings.max_segment_chars;

        if text.chars().count() <= max_chars {
            out.push(build_segment(video_id, raw, text, language));
            return;
        }

        let chunks = split_text(text, max_chars);
        debug!(
            "Splitting {}-char segment into {} chunks",
            text.chars().count(),
            chunks.len()
        );

        // Sub-segments cover the parent's time span, apportioned by
        // character share.
        let total_chars: usize = chunks.iter().map(|c| c.chars().count()).sum();
        let span = raw.end_seconds - raw.start_seconds;
        let mut consumed = 0usize;

        for chunk in chunks {
            let chunk_chars = chunk.chars().count();
            let start =
                raw.start_seconds + span * (consumed as f64 / total_chars.max(1) as f64);
            consumed += chunk_chars;
            let end = raw.start_seconds + span * (consumed as f64 / total_chars.max(1) as f64);

            let piece = RawSegment {
                start_seconds: start,
                end_seconds: end,
                text: chunk,
                confidence: raw.confidence,
                speaker: raw.speaker.clone(),
            };
            let text = piece.text.clone();
            out.push(build_segment(video_id, &piece, &text, language));
        }
    }

    async fn mark_video_completed(&self, video_id: &str) -> StageResult<()> {
        let now = Utc::now();
        let mut video = self
            .videos
            .get(video_id)
            .await
            .map_err(storage_error)?
            .unwrap_or_else(|| crate::storage::VideoRecord::new(video_id, None));

        video.status = VideoStatus::Completed;
        video.transcribed_at = Some(now);
        video.updated_at = now;

        self.videos.upsert(&video).await.map_err(storage_error)
    }
}

fn storage_error(e: TolkError) -> StageError {
    StageError::Storage(e.to_string())
}

fn build_segment(
    video_id: &str,
    raw: &RawSegment,
    text: &str,
    language: Option<&str>,
) -> TranscriptSegment {
    let mut segment = TranscriptSegment::new(
        video_id,
        0, // re-indexed across the final list later
        raw.start_seconds,
        raw.end_seconds,
        text,
    );
    segment.confidence = raw.confidence;
    segment.language = language.map(|l| l.to_string());
    segment.speaker = raw.speaker.clone();
    segment
}

/// Split text into roughly even character chunks no longer than `max_chars`.
///
/// Splits at whitespace when possible; a single word longer than the chunk
/// size is hard-split on character boundaries.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let total = text.chars().count();
    if total <= max_chars {
        return vec![text.to_string()];
    }

    let chunk_count = total.div_ceil(max_chars);
    let target = total.div_ceil(chunk_count);

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        // A single word longer than a whole chunk gets hard-split.
        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let word_chars: Vec<char> = word.chars().collect();
            for piece in word_chars.chunks(target) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let extra = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + extra > target && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NullSink;
    use crate::storage::MemoryStore;

    fn processor(store: Arc<MemoryStore>) -> SegmentationProcessor {
        SegmentationProcessor::new(store.clone(), store, SegmentationSettings::default())
    }

    fn long_segment(chars: usize) -> RawSegment {
        let word = "word ";
        let text: String = word.repeat(chars / word.len() + 1);
        let mut raw = RawSegment::new(10.0, 70.0, text.chars().take(chars).collect::<String>());
        raw.confidence = Some(0.9);
        raw.speaker = Some("spk_0".to_string());
        raw
    }

    #[test]
    fn test_split_text_even_chunks() {
        let text = "ab ".repeat(400); // 1200 chars
        let chunks = split_text(text.trim(), 500);

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 500);
        }

        // No text lost (modulo the joining whitespace)
        let rejoined: String = chunks.join(" ");
        assert_eq!(
            rejoined.split_whitespace().count(),
            text.trim().split_whitespace().count()
        );
    }

    #[test]
    fn test_split_text_hard_splits_giant_word() {
        let text = "a".repeat(1100);
        let chunks = split_text(&text, 500);
        assert!(chunks.len() >= 3);
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(total, 1100);
    }

    #[tokio::test]
    async fn test_oversized_segment_is_split_with_dense_indices() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let cancel = CancellationToken::new();

        let raw = long_segment(1200);
        let transcription =
            TranscriptionResult::new(vec![raw.clone()], Some("en".to_string()));

        let count = processor
            .run("video-1", &transcription, &NullSink, &cancel)
            .await
            .unwrap();

        assert!(count >= 3);

        let segments = store.get_by_video_id("video-1").await.unwrap();
        assert_eq!(segments.len(), count);

        // Dense 0-based indices
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.segment_index, i as i32);
        }

        // Sub-segments cover the parent's span and inherit fields
        assert!((segments.first().unwrap().start_seconds - raw.start_seconds).abs() < 1e-9);
        assert!((segments.last().unwrap().end_seconds - raw.end_seconds).abs() < 1e-9);
        for segment in &segments {
            assert_eq!(segment.confidence, Some(0.9));
            assert_eq!(segment.speaker.as_deref(), Some("spk_0"));
            assert_eq!(segment.language.as_deref(), Some("en"));
        }
    }

    #[tokio::test]
    async fn test_rerun_fully_replaces_previous_segments() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let cancel = CancellationToken::new();

        let first = TranscriptionResult::new(vec![long_segment(1200)], None);
        processor
            .run("video-1", &first, &NullSink, &cancel)
            .await
            .unwrap();

        let second = TranscriptionResult::new(
            vec![RawSegment::new(0.0, 5.0, "short one"), RawSegment::new(5.0, 9.0, "short two")],
            None,
        );
        let count = processor
            .run("video-1", &second, &NullSink, &cancel)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(store.count_for_video("video-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_transcription_is_integrity_error() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let cancel = CancellationToken::new();

        let empty = TranscriptionResult::new(Vec::new(), None);
        let result = processor.run("video-1", &empty, &NullSink, &cancel).await;

        assert!(matches!(result, Err(StageError::Integrity(_))));
        assert_eq!(store.count_for_video("video-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_video_marked_completed_with_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let cancel = CancellationToken::new();

        let transcription =
            TranscriptionResult::new(vec![RawSegment::new(0.0, 3.0, "hello")], None);
        processor
            .run("video-1", &transcription, &NullSink, &cancel)
            .await
            .unwrap();

        let video = VideoStore::get(store.as_ref(), "video-1").await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Completed);
        assert!(video.transcribed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_persists_nothing() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let transcription =
            TranscriptionResult::new(vec![RawSegment::new(0.0, 3.0, "hello")], None);
        let result = processor
            .run("video-1", &transcription, &NullSink, &cancel)
            .await;

        assert!(matches!(result, Err(StageError::Cancelled)));
        assert_eq!(store.count_for_video("video-1").await.unwrap(), 0);
    }
}
