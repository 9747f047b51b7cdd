//! Failure classification and retry policy.
//!
//! The classifier is the single decision point between "retry later" and
//! "give up now": permanent failures go straight to the dead-letter queue
//! instead of burning retries, while transient ones get a bounded number of
//! attempts with increasing delay.

use crate::config::PipelineSettings;
use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Category assigned to a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Network blip, timeout, or flaky external tool; worth retrying soon.
    TransientNetwork,
    /// Disk or memory pressure; worth retrying after a longer pause.
    ResourceExhaustion,
    /// The input or resource can never succeed; fail fast.
    Permanent,
    /// Segment data failed a hard integrity check; always fatal.
    IntegrityViolation,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::TransientNetwork => "transient_network",
            FailureCategory::ResourceExhaustion => "resource_exhaustion",
            FailureCategory::Permanent => "permanent",
            FailureCategory::IntegrityViolation => "integrity_violation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transient_network" => Some(FailureCategory::TransientNetwork),
            "resource_exhaustion" => Some(FailureCategory::ResourceExhaustion),
            "permanent" => Some(FailureCategory::Permanent),
            "integrity_violation" => Some(FailureCategory::IntegrityViolation),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retry decision for a classified failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub category: FailureCategory,
    /// Retries allowed for this category; 0 means fail immediately.
    pub max_retries: u32,
    /// Delay schedule; attempts beyond the schedule reuse the last entry.
    pub backoff: Vec<Duration>,
    /// True if the job must be captured in the dead-letter queue without
    /// further attempts.
    pub dead_letter: bool,
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based).
    ///
    /// Attempt 1 uses the first schedule entry; attempts past the end of the
    /// schedule repeat the last entry.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.max(1) as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

/// Maps typed stage errors to retry policies.
///
/// Classification looks only at the error variant, so the same error type
/// always yields the same category.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    max_retries: u32,
    transient_backoff: Vec<Duration>,
    resource_backoff: Vec<Duration>,
}

impl FailureClassifier {
    /// Build a classifier from pipeline settings.
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            transient_backoff: settings
                .transient_backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            resource_backoff: settings
                .resource_backoff_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Classify a stage failure into a retry policy.
    ///
    /// Callers must check [`StageError::is_cancelled`] first: cancellation
    /// propagates to the dispatcher and is never classified.
    pub fn policy(&self, error: &StageError) -> RetryPolicy {
        match error {
            StageError::Network(_)
            | StageError::Timeout(_)
            | StageError::ToolFailed(_)
            | StageError::Transcription(_) => RetryPolicy {
                category: FailureCategory::TransientNetwork,
                max_retries: self.max_retries,
                backoff: self.transient_backoff.clone(),
                dead_letter: false,
            },
            StageError::ResourceExhausted(_) | StageError::Storage(_) => RetryPolicy {
                category: FailureCategory::ResourceExhaustion,
                max_retries: self.max_retries,
                backoff: self.resource_backoff.clone(),
                dead_letter: false,
            },
            StageError::NotFound(_)
            | StageError::AccessDenied(_)
            | StageError::InvalidInput(_)
            | StageError::ToolNotFound(_) => RetryPolicy {
                category: FailureCategory::Permanent,
                max_retries: 0,
                backoff: Vec::new(),
                dead_letter: true,
            },
            StageError::Integrity(_) => RetryPolicy {
                category: FailureCategory::IntegrityViolation,
                max_retries: 0,
                backoff: Vec::new(),
                dead_letter: true,
            },
            // Never reached when callers honour the cancellation contract.
            StageError::Cancelled => RetryPolicy {
                category: FailureCategory::TransientNetwork,
                max_retries: 0,
                backoff: Vec::new(),
                dead_letter: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new(&PipelineSettings::default())
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let c = classifier();
        for error in [
            StageError::NotFound("video gone".into()),
            StageError::AccessDenied("region blocked".into()),
            StageError::InvalidInput("bad container".into()),
            StageError::ToolNotFound("yt-dlp".into()),
        ] {
            let policy = c.policy(&error);
            assert_eq!(policy.category, FailureCategory::Permanent);
            assert_eq!(policy.max_retries, 0);
            assert!(policy.dead_letter);
        }
    }

    #[test]
    fn test_transient_errors_use_spec_schedule() {
        let policy = classifier().policy(&StageError::Network("reset".into()));
        assert_eq!(policy.category, FailureCategory::TransientNetwork);
        assert!(policy.max_retries > 0);
        assert!(!policy.dead_letter);
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(60));
        // Past the end of the schedule the last delay repeats.
        assert_eq!(policy.backoff_delay(7), Duration::from_secs(60));
    }

    #[test]
    fn test_resource_exhaustion_backs_off_longer() {
        let policy = classifier().policy(&StageError::ResourceExhausted("disk".into()));
        assert_eq!(policy.category, FailureCategory::ResourceExhaustion);
        assert!(policy.backoff_delay(1) > Duration::from_secs(30));
    }

    #[test]
    fn test_integrity_violation_is_its_own_category() {
        let policy = classifier().policy(&StageError::Integrity("negative timestamp".into()));
        assert_eq!(policy.category, FailureCategory::IntegrityViolation);
        assert_eq!(policy.max_retries, 0);
        assert!(policy.dead_letter);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let first = c.policy(&StageError::Timeout("a".into()));
        let second = c.policy(&StageError::Timeout("completely different message".into()));
        assert_eq!(first.category, second.category);
        assert_eq!(first.max_retries, second.max_retries);
    }

    #[test]
    fn test_empty_schedule_yields_zero_delay() {
        let policy = RetryPolicy {
            category: FailureCategory::TransientNetwork,
            max_retries: 1,
            backoff: Vec::new(),
            dead_letter: false,
        };
        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
    }
}
