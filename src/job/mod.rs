//! Job model for the transcription pipeline.
//!
//! A [`Job`] is the unit of pipeline work: one video driven through
//! download, audio extraction, transcription, and segmentation. The record
//! is created Pending by the enqueue path, mutated exclusively by the
//! orchestrator while Running/Retrying, and becomes terminal exactly once.

mod progress;
mod retry;

pub use progress::{stage_weight, StageProgress};
pub use retry::{FailureCategory, FailureClassifier, RetryPolicy};

use crate::config::StageWeightSettings;
use crate::error::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque structured parameters carried by a job.
///
/// Round-tripped through the store unchanged; the pipeline uses it for
/// artifact hand-off between invocations (media path, audio path).
pub type JobParameters = serde_json::Map<String, serde_json::Value>;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a first invocation.
    #[default]
    Pending,
    /// An invocation is actively executing a stage.
    Running,
    /// A transient failure occurred; waiting for the dispatcher to re-invoke.
    Retrying,
    /// All stages finished.
    Completed,
    /// Failed permanently; a dead-letter snapshot exists.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "retrying" => Some(JobStatus::Retrying),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more mutation expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ordered phase of the pipeline.
///
/// `Completed` is the bookkeeping end marker; the four working stages carry
/// progress weights.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Download,
    AudioExtraction,
    Transcription,
    Segmentation,
    Completed,
}

impl PipelineStage {
    /// The weighted working stages, in execution order.
    pub const WEIGHTED: [PipelineStage; 4] = [
        PipelineStage::Download,
        PipelineStage::AudioExtraction,
        PipelineStage::Transcription,
        PipelineStage::Segmentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Download => "download",
            PipelineStage::AudioExtraction => "audio_extraction",
            PipelineStage::Transcription => "transcription",
            PipelineStage::Segmentation => "segmentation",
            PipelineStage::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "download" => Some(PipelineStage::Download),
            "audio_extraction" => Some(PipelineStage::AudioExtraction),
            "transcription" => Some(PipelineStage::Transcription),
            "segmentation" => Some(PipelineStage::Segmentation),
            "completed" => Some(PipelineStage::Completed),
            _ => None,
        }
    }

    /// The stage executed after this one.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Download => Some(PipelineStage::AudioExtraction),
            PipelineStage::AudioExtraction => Some(PipelineStage::Transcription),
            PipelineStage::Transcription => Some(PipelineStage::Segmentation),
            PipelineStage::Segmentation => Some(PipelineStage::Completed),
            PipelineStage::Completed => None,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full video-to-segments transcription pipeline.
    #[default]
    TranscribeVideo,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TranscribeVideo => "transcribe_video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transcribe_video" => Some(JobType::TranscribeVideo),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// User who owns this job.
    pub user_id: String,
    /// Target video, once known.
    pub video_id: Option<String>,
    /// Kind of work performed.
    pub job_type: JobType,
    /// Opaque structured parameters.
    pub parameters: JobParameters,
    /// Current processing status.
    pub status: JobStatus,
    /// Stage currently executing (or the one that failed); None before the
    /// first invocation.
    pub current_stage: Option<PipelineStage>,
    /// Per-stage progress map.
    pub stage_progress: StageProgress,
    /// Derived weighted overall progress (0-100).
    pub overall_progress: u8,
    /// Message of the most recent stage failure.
    pub last_error_message: Option<String>,
    /// Variant name of the most recent stage failure.
    pub last_error_kind: Option<String>,
    /// Category assigned to the most recent stage failure.
    pub last_failure_category: Option<FailureCategory>,
    /// Debug rendering of the most recent failure, for diagnosis.
    pub last_error_backtrace: Option<String>,
    /// Stage the job failed in, set when the job goes terminal Failed.
    pub failed_stage: Option<PipelineStage>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Operator-facing retry ceiling for this job.
    pub max_retries: u32,
    /// Earliest time the dispatcher should re-invoke, while Retrying.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new Pending job.
    pub fn new(
        user_id: impl Into<String>,
        video_id: Option<String>,
        job_type: JobType,
        parameters: JobParameters,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            video_id,
            job_type,
            parameters,
            status: JobStatus::Pending,
            current_stage: None,
            stage_progress: StageProgress::new(),
            overall_progress: 0,
            last_error_message: None,
            last_error_kind: None,
            last_failure_category: None,
            last_error_backtrace: None,
            failed_stage: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record progress for a stage and refresh the weighted aggregate.
    ///
    /// Terminal jobs are never mutated.
    pub fn set_stage_progress(
        &mut self,
        stage: PipelineStage,
        value: f32,
        weights: &StageWeightSettings,
    ) {
        if self.is_terminal() {
            return;
        }
        self.stage_progress.set(stage, value);
        self.overall_progress = self.stage_progress.overall(weights);
        self.updated_at = Utc::now();
    }

    /// Enter a stage: mark Running, zero the stage's progress.
    pub fn begin_stage(&mut self, stage: PipelineStage, weights: &StageWeightSettings) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Running;
        self.current_stage = Some(stage);
        self.next_retry_at = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.set_stage_progress(stage, 0.0, weights);
    }

    /// Finish a stage: progress 100, advance the stage pointer.
    pub fn complete_stage(&mut self, stage: PipelineStage, weights: &StageWeightSettings) {
        if self.is_terminal() {
            return;
        }
        self.set_stage_progress(stage, 100.0, weights);
        self.current_stage = stage.next().or(self.current_stage);
    }

    /// Record the failure context of a stage error.
    pub fn record_failure(&mut self, error: &StageError, category: FailureCategory) {
        if self.is_terminal() {
            return;
        }
        self.last_error_message = Some(error.to_string());
        self.last_error_kind = Some(error.kind().to_string());
        self.last_failure_category = Some(category);
        self.last_error_backtrace = Some(format!("{error:?}"));
        self.updated_at = Utc::now();
    }

    /// Schedule a retry: the dispatcher re-invokes at/after `next_retry_at`.
    pub fn mark_retrying(&mut self, next_retry_at: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Retrying;
        self.next_retry_at = Some(next_retry_at);
        self.updated_at = Utc::now();
    }

    /// Terminal success.
    pub fn mark_completed(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.current_stage = Some(PipelineStage::Completed);
        self.next_retry_at = None;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Terminal failure in the given stage.
    pub fn mark_failed(&mut self, stage: PipelineStage) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.failed_stage = Some(stage);
        self.next_retry_at = None;
        self.failed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Terminal cancellation.
    pub fn mark_cancelled(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Cancelled;
        self.next_retry_at = None;
        self.updated_at = Utc::now();
    }

    /// The stage a (re-)invocation should execute next.
    ///
    /// A fresh job starts at Download; a resumed job re-enters the stage it
    /// was in when the previous invocation ended.
    pub fn resume_stage(&self) -> Option<PipelineStage> {
        match self.current_stage {
            None => Some(PipelineStage::Download),
            Some(PipelineStage::Completed) => None,
            Some(stage) => Some(stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> StageWeightSettings {
        StageWeightSettings::default()
    }

    fn job() -> Job {
        Job::new("user-1", Some("video-1".into()), JobType::default(), JobParameters::new(), 3)
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.overall_progress, 0);
        assert_eq!(job.resume_stage(), Some(PipelineStage::Download));
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_begin_stage_zeroes_progress_and_runs() {
        let mut job = job();
        job.begin_stage(PipelineStage::Download, &weights());

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.current_stage, Some(PipelineStage::Download));
        assert_eq!(job.stage_progress.get(PipelineStage::Download), Some(0.0));
        assert!(job.started_at.is_some());
    }

    #[test]
    fn test_complete_stage_advances_pointer() {
        let mut job = job();
        job.begin_stage(PipelineStage::Download, &weights());
        job.complete_stage(PipelineStage::Download, &weights());

        assert_eq!(job.current_stage, Some(PipelineStage::AudioExtraction));
        assert_eq!(job.overall_progress, 20);
    }

    #[test]
    fn test_full_run_reaches_100() {
        let mut job = job();
        for stage in PipelineStage::WEIGHTED {
            job.begin_stage(stage, &weights());
            job.complete_stage(stage, &weights());
        }
        job.mark_completed();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.overall_progress, 100);
        assert_eq!(job.current_stage, Some(PipelineStage::Completed));
        assert_eq!(job.resume_stage(), None);
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut job = job();
        job.mark_completed();
        let completed_at = job.completed_at;

        job.mark_failed(PipelineStage::Download);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.failed_at.is_none());
        assert_eq!(job.completed_at, completed_at);
    }

    #[test]
    fn test_no_stage_mutation_after_terminal() {
        let mut job = job();
        job.begin_stage(PipelineStage::Download, &weights());
        job.mark_failed(PipelineStage::Download);
        let before = job.overall_progress;

        job.set_stage_progress(PipelineStage::Download, 100.0, &weights());
        job.begin_stage(PipelineStage::AudioExtraction, &weights());

        assert_eq!(job.overall_progress, before);
        assert_eq!(job.current_stage, Some(PipelineStage::Download));
    }

    #[test]
    fn test_retrying_resumes_at_current_stage() {
        let mut job = job();
        job.begin_stage(PipelineStage::Download, &weights());
        job.complete_stage(PipelineStage::Download, &weights());
        job.begin_stage(PipelineStage::AudioExtraction, &weights());
        job.mark_retrying(Utc::now() + chrono::Duration::seconds(10));

        assert_eq!(job.status, JobStatus::Retrying);
        assert!(job.next_retry_at.is_some());
        assert_eq!(job.resume_stage(), Some(PipelineStage::AudioExtraction));
    }

    #[test]
    fn test_record_failure_captures_context() {
        let mut job = job();
        let error = StageError::Network("connection reset".into());
        job.record_failure(&error, FailureCategory::TransientNetwork);

        assert_eq!(job.last_error_kind.as_deref(), Some("network"));
        assert_eq!(
            job.last_failure_category,
            Some(FailureCategory::TransientNetwork)
        );
        assert!(job
            .last_error_message
            .as_deref()
            .unwrap()
            .contains("connection reset"));
    }
}
