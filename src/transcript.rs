//! Transcript data models.
//!
//! [`TranscriptionResult`] is the raw output handed over by the
//! transcription engine; [`TranscriptSegment`] is the persisted,
//! integrity-checked form the segmentation stage produces from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw timed span as returned by the transcription engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSegment {
    /// Start time in seconds.
    pub start_seconds: f64,
    /// End time in seconds.
    pub end_seconds: f64,
    /// Transcribed text content.
    pub text: String,
    /// Recognition confidence (0-1), if reported.
    pub confidence: Option<f32>,
    /// Speaker label, if diarized.
    pub speaker: Option<String>,
}

impl RawSegment {
    /// Create a new raw segment.
    pub fn new(start_seconds: f64, end_seconds: f64, text: impl Into<String>) -> Self {
        Self {
            start_seconds,
            end_seconds,
            text: text.into(),
            confidence: None,
            speaker: None,
        }
    }
}

/// Complete result of the transcription stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript text (concatenated segments).
    pub text: String,
    /// Detected or requested language code.
    pub language: Option<String>,
    /// Ordered raw segments with timestamps.
    pub segments: Vec<RawSegment>,
    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl TranscriptionResult {
    /// Create a result from segments, deriving full text and duration.
    pub fn new(segments: Vec<RawSegment>, language: Option<String>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let duration_seconds = segments.last().map(|s| s.end_seconds).unwrap_or(0.0);

        Self {
            text,
            language,
            segments,
            duration_seconds,
        }
    }
}

/// A persisted timed span of transcribed text belonging to a video.
///
/// After segmentation, segments for a video carry a dense 0-based
/// `segment_index` with strictly non-decreasing start times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Unique segment ID.
    pub id: Uuid,
    /// Video this segment belongs to.
    pub video_id: String,
    /// Dense 0-based position within the video's transcript.
    pub segment_index: i32,
    /// Start time in seconds.
    pub start_seconds: f64,
    /// End time in seconds.
    pub end_seconds: f64,
    /// Text content.
    pub text: String,
    /// Recognition confidence (0-1), if known.
    pub confidence: Option<f32>,
    /// Language code, if known.
    pub language: Option<String>,
    /// Speaker label, if known.
    pub speaker: Option<String>,
}

impl TranscriptSegment {
    /// Create a new segment.
    pub fn new(
        video_id: impl Into<String>,
        segment_index: i32,
        start_seconds: f64,
        end_seconds: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id: video_id.into(),
            segment_index,
            start_seconds,
            end_seconds,
            text: text.into(),
            confidence: None,
            language: None,
            speaker: None,
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
