//! Segment integrity validation.
//!
//! Hard failures mean the data must never be persisted; soft failures are
//! quality issues worth surfacing but not worth failing an otherwise
//! successful job over. The validator itself has no side effects: callers
//! decide how to log the report.

use crate::error::StageError;
use crate::transcript::TranscriptSegment;

/// A quality issue that is logged but does not abort segmentation.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftViolation {
    /// `segment_index` is not dense: expected one value, found another.
    IndexGap { position: usize, expected: i32, found: i32 },
    /// Start time decreased between consecutive segments.
    NonMonotonicStart { position: usize },
    /// A segment's time range overlaps the next one.
    Overlap { position: usize },
    /// Empty or whitespace-only text.
    EmptyText { position: usize },
    /// `end_seconds <= start_seconds`.
    NonPositiveDuration { position: usize },
}

impl std::fmt::Display for SoftViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftViolation::IndexGap {
                position,
                expected,
                found,
            } => write!(
                f,
                "segment {position}: index gap (expected {expected}, found {found})"
            ),
            SoftViolation::NonMonotonicStart { position } => {
                write!(f, "segment {position}: start time decreases")
            }
            SoftViolation::Overlap { position } => {
                write!(f, "segment {position}: time range overlaps next segment")
            }
            SoftViolation::EmptyText { position } => {
                write!(f, "segment {position}: empty text")
            }
            SoftViolation::NonPositiveDuration { position } => {
                write!(f, "segment {position}: non-positive duration")
            }
        }
    }
}

/// Outcome of a validation pass that did not hit a hard failure.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub warnings: Vec<SoftViolation>,
}

impl ValidationReport {
    /// True if no soft violations were found either.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Validate a final segment list for a video.
///
/// Hard failures (empty list, missing or mismatched video id, negative
/// timestamps) return an [`StageError::Integrity`] error; everything else is
/// collected into the report's warnings.
pub fn validate_segments(
    expected_video_id: &str,
    segments: &[TranscriptSegment],
) -> Result<ValidationReport, StageError> {
    if segments.is_empty() {
        return Err(StageError::Integrity(format!(
            "no segments produced for video {expected_video_id}"
        )));
    }

    for (position, segment) in segments.iter().enumerate() {
        if segment.video_id.is_empty() {
            return Err(StageError::Integrity(format!(
                "segment {position} has an empty video id"
            )));
        }
        if segment.video_id != expected_video_id {
            return Err(StageError::Integrity(format!(
                "segment {position} belongs to video {:?}, expected {expected_video_id:?}",
                segment.video_id
            )));
        }
        if segment.start_seconds < 0.0 || segment.end_seconds < 0.0 {
            return Err(StageError::Integrity(format!(
                "segment {position} has a negative timestamp ({} -> {})",
                segment.start_seconds, segment.end_seconds
            )));
        }
    }

    let mut report = ValidationReport::default();

    for (position, segment) in segments.iter().enumerate() {
        if segment.segment_index != position as i32 {
            report.warnings.push(SoftViolation::IndexGap {
                position,
                expected: position as i32,
                found: segment.segment_index,
            });
        }
        if segment.text.trim().is_empty() {
            report.warnings.push(SoftViolation::EmptyText { position });
        }
        if segment.end_seconds <= segment.start_seconds {
            report
                .warnings
                .push(SoftViolation::NonPositiveDuration { position });
        }
        if let Some(next) = segments.get(position + 1) {
            if next.start_seconds < segment.start_seconds {
                report
                    .warnings
                    .push(SoftViolation::NonMonotonicStart { position: position + 1 });
            }
            if segment.end_seconds > next.start_seconds {
                report.warnings.push(SoftViolation::Overlap { position });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: i32, start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new("video-1", index, start, end, text)
    }

    #[test]
    fn test_empty_list_is_hard_failure() {
        let result = validate_segments("video-1", &[]);
        assert!(matches!(result, Err(StageError::Integrity(_))));
    }

    #[test]
    fn test_negative_timestamp_is_hard_failure() {
        let segments = vec![segment(0, -1.0, 2.0, "bad")];
        let result = validate_segments("video-1", &segments);
        assert!(matches!(result, Err(StageError::Integrity(_))));
    }

    #[test]
    fn test_mismatched_video_id_is_hard_failure() {
        let mut other = segment(0, 0.0, 1.0, "text");
        other.video_id = "video-2".to_string();
        let result = validate_segments("video-1", &[other]);
        assert!(matches!(result, Err(StageError::Integrity(_))));
    }

    #[test]
    fn test_clean_list_passes() {
        let segments = vec![
            segment(0, 0.0, 2.0, "first"),
            segment(1, 2.0, 4.0, "second"),
        ];
        let report = validate_segments("video-1", &segments).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_index_gap_is_soft() {
        let segments = vec![segment(0, 0.0, 2.0, "first"), segment(5, 2.0, 4.0, "second")];
        let report = validate_segments("video-1", &segments).unwrap();
        assert_eq!(
            report.warnings,
            vec![SoftViolation::IndexGap {
                position: 1,
                expected: 1,
                found: 5
            }]
        );
    }

    #[test]
    fn test_overlap_and_backwards_time_are_soft() {
        let segments = vec![
            segment(0, 0.0, 3.0, "first"),
            segment(1, 2.0, 4.0, "overlapping"),
            segment(2, 1.0, 5.0, "backwards"),
        ];
        let report = validate_segments("video-1", &segments).unwrap();

        assert!(report
            .warnings
            .contains(&SoftViolation::Overlap { position: 0 }));
        assert!(report
            .warnings
            .contains(&SoftViolation::NonMonotonicStart { position: 2 }));
    }

    #[test]
    fn test_empty_text_and_zero_duration_are_soft() {
        let segments = vec![
            segment(0, 0.0, 0.0, "   "),
            segment(1, 0.0, 2.0, "fine"),
        ];
        let report = validate_segments("video-1", &segments).unwrap();

        assert!(report
            .warnings
            .contains(&SoftViolation::EmptyText { position: 0 }));
        assert!(report
            .warnings
            .contains(&SoftViolation::NonPositiveDuration { position: 0 }));
    }
}
