//! Dead-letter snapshots of permanently failed jobs.
//!
//! A [`DeadLetterJob`] is written once by the orchestrator when a failure is
//! classified as non-retryable or retries run out. It carries enough of the
//! original job to diagnose the failure and to requeue without re-deriving
//! lost context. Requeue never resurrects the old job: it creates a brand
//! new Pending one.

use crate::error::{Result, StageError};
use crate::job::{FailureCategory, Job, JobParameters, JobType};
use crate::storage::{DeadLetterStore, JobStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Short code describing why a job landed in the dead-letter queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The failure category forbids retrying at all.
    NonRetryable,
    /// The failure was retryable but the retry budget ran out.
    RetriesExhausted,
    /// A hard segment integrity check failed.
    IntegrityViolation,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NonRetryable => "non_retryable",
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::IntegrityViolation => "integrity_violation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "non_retryable" => Some(FailureReason::NonRetryable),
            "retries_exhausted" => Some(FailureReason::RetriesExhausted),
            "integrity_violation" => Some(FailureReason::IntegrityViolation),
            _ => None,
        }
    }

    /// Reason code for a failure that exhausted its options.
    pub fn from_category(category: FailureCategory, retries_exhausted: bool) -> Self {
        match category {
            FailureCategory::IntegrityViolation => FailureReason::IntegrityViolation,
            FailureCategory::Permanent => FailureReason::NonRetryable,
            _ if retries_exhausted => FailureReason::RetriesExhausted,
            _ => FailureReason::NonRetryable,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured description of what went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetails {
    /// Variant name of the stage error.
    pub error_kind: String,
    /// Human-readable message.
    pub message: String,
    /// Debug rendering of the error, if captured.
    pub backtrace: Option<String>,
}

/// Enough of the original job to reconstruct a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterPayload {
    /// Target video of the original job.
    pub video_id: Option<String>,
    /// Kind of work the original job performed.
    pub job_type: JobType,
    /// Opaque parameters of the original job.
    pub parameters: JobParameters,
}

/// Immutable snapshot of a permanently failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    /// Unique snapshot ID.
    pub id: Uuid,
    /// The job this snapshot was taken from.
    pub job_id: Uuid,
    /// Owner of the original job.
    pub user_id: String,
    /// Why the job was dead-lettered.
    pub failure_reason: FailureReason,
    /// Structured failure details.
    pub details: FailureDetails,
    /// Enough data to requeue.
    pub payload: DeadLetterPayload,
    /// When the job failed.
    pub failed_at: DateTime<Utc>,
    /// How many retries were attempted before giving up.
    pub attempted_retries: u32,
    /// True once an operator has requeued this entry. Never flips back.
    pub requeued: bool,
    pub requeued_at: Option<DateTime<Utc>>,
    pub requeued_by: Option<String>,
}

impl DeadLetterJob {
    /// Snapshot a failing job at the moment it is declared unrecoverable.
    pub fn from_job(job: &Job, reason: FailureReason, error: &StageError) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            user_id: job.user_id.clone(),
            failure_reason: reason,
            details: FailureDetails {
                error_kind: error.kind().to_string(),
                message: error.to_string(),
                backtrace: Some(format!("{error:?}")),
            },
            payload: DeadLetterPayload {
                video_id: job.video_id.clone(),
                job_type: job.job_type,
                parameters: job.parameters.clone(),
            },
            failed_at: Utc::now(),
            attempted_retries: job.retry_count,
            requeued: false,
            requeued_at: None,
            requeued_by: None,
        }
    }

    /// Build a brand-new Pending job from the stored payload.
    ///
    /// The fresh job starts with a zero retry count and its own identity;
    /// the original job stays Failed.
    pub fn rebuild_job(&self, max_retries: u32) -> Job {
        Job::new(
            self.user_id.clone(),
            self.payload.video_id.clone(),
            self.payload.job_type,
            self.payload.parameters.clone(),
            max_retries,
        )
    }
}

/// Requeue a dead-letter entry: mark it requeued, then create a fresh job.
///
/// Returns the new job, or `None` if the entry does not exist or was
/// already requeued (in which case nothing is mutated and no job is
/// created).
pub async fn requeue(
    dead_letters: &dyn DeadLetterStore,
    jobs: &dyn JobStore,
    entry_id: Uuid,
    requeued_by: &str,
    max_retries: u32,
) -> Result<Option<Job>> {
    let Some(entry) = dead_letters.get(entry_id).await? else {
        return Ok(None);
    };

    if !dead_letters.mark_as_requeued(entry_id, requeued_by).await? {
        return Ok(None);
    }

    let job = entry.rebuild_job(max_retries);
    jobs.insert(&job).await?;

    info!(
        "Requeued dead-letter entry {} as job {} (by {})",
        entry_id, job.id, requeued_by
    );
    Ok(Some(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let mut parameters = JobParameters::new();
        parameters.insert("media_path".into(), "/tmp/a.media".into());
        let mut job = Job::new(
            "user-1",
            Some("video-1".into()),
            JobType::TranscribeVideo,
            parameters,
            3,
        );
        job.retry_count = 3;
        job
    }

    #[test]
    fn test_snapshot_captures_payload_and_details() {
        let job = sample_job();
        let error = StageError::NotFound("video gone".into());
        let entry = DeadLetterJob::from_job(&job, FailureReason::NonRetryable, &error);

        assert_eq!(entry.job_id, job.id);
        assert_eq!(entry.attempted_retries, 3);
        assert_eq!(entry.details.error_kind, "not_found");
        assert_eq!(entry.payload.video_id.as_deref(), Some("video-1"));
        assert!(entry.payload.parameters.contains_key("media_path"));
        assert!(!entry.requeued);
    }

    #[test]
    fn test_rebuild_job_is_fresh() {
        let job = sample_job();
        let error = StageError::Network("down".into());
        let entry = DeadLetterJob::from_job(&job, FailureReason::RetriesExhausted, &error);

        let fresh = entry.rebuild_job(5);
        assert_ne!(fresh.id, job.id);
        assert_eq!(fresh.retry_count, 0);
        assert_eq!(fresh.max_retries, 5);
        assert_eq!(fresh.video_id, job.video_id);
        assert_eq!(fresh.parameters, job.parameters);
        assert_eq!(fresh.status, crate::job::JobStatus::Pending);
    }

    #[test]
    fn test_reason_from_category() {
        assert_eq!(
            FailureReason::from_category(FailureCategory::Permanent, false),
            FailureReason::NonRetryable
        );
        assert_eq!(
            FailureReason::from_category(FailureCategory::TransientNetwork, true),
            FailureReason::RetriesExhausted
        );
        assert_eq!(
            FailureReason::from_category(FailureCategory::IntegrityViolation, true),
            FailureReason::IntegrityViolation
        );
    }

    #[test]
    fn test_reason_roundtrip() {
        for reason in [
            FailureReason::NonRetryable,
            FailureReason::RetriesExhausted,
            FailureReason::IntegrityViolation,
        ] {
            assert_eq!(FailureReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(FailureReason::from_str("bogus"), None);
    }
}
