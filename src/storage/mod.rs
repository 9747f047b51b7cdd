//! Persistence abstraction for Tolk.
//!
//! Provides trait-based store interfaces with a SQLite implementation for
//! production use and an in-memory implementation for tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::dead_letter::{DeadLetterJob, FailureReason};
use crate::error::Result;
use crate::job::Job;
use crate::transcript::{TranscriptSegment, TranscriptionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Processing status of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Known but not yet processed.
    #[default]
    Pending,
    /// A pipeline job is working on it.
    Processing,
    /// Transcript segments are persisted.
    Completed,
    /// The owning job failed permanently.
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VideoStatus::Pending),
            "processing" => Some(VideoStatus::Processing),
            "completed" => Some(VideoStatus::Completed),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A video known to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Video identifier (YouTube ID).
    pub id: String,
    /// Title, once metadata has been fetched.
    pub title: Option<String>,
    /// Processing status.
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When transcription finished.
    pub transcribed_at: Option<DateTime<Utc>>,
}

impl VideoRecord {
    /// Create a new pending video record.
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title,
            status: VideoStatus::Pending,
            created_at: now,
            updated_at: now,
            transcribed_at: None,
        }
    }
}

/// Store for pipeline jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Fetch a job by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Persist the current state of a job. Fails if the job does not exist.
    async fn update(&self, job: &Job) -> Result<()>;

    /// List the most recently created jobs.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>>;
}

/// Store for persisted transcript segments.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Replace all segments for a video with the given set, in one
    /// transaction-like operation. Returns the number of segments inserted.
    async fn replace_for_video(
        &self,
        video_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<usize>;

    /// All segments for a video, ordered by segment index.
    async fn get_by_video_id(&self, video_id: &str) -> Result<Vec<TranscriptSegment>>;

    /// Number of segments persisted for a video.
    async fn count_for_video(&self, video_id: &str) -> Result<usize>;
}

/// Store for video records and raw transcription artifacts.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert or update a video record.
    async fn upsert(&self, video: &VideoRecord) -> Result<()>;

    /// Fetch a video record.
    async fn get(&self, video_id: &str) -> Result<Option<VideoRecord>>;

    /// Persist the raw transcription result so a later segmentation attempt
    /// can resume without re-transcribing.
    async fn store_raw_transcript(
        &self,
        video_id: &str,
        transcript: &TranscriptionResult,
    ) -> Result<()>;

    /// Fetch the stored raw transcription result, if any.
    async fn get_raw_transcript(&self, video_id: &str) -> Result<Option<TranscriptionResult>>;
}

/// Store for dead-letter snapshots.
///
/// The store never creates jobs; requeueing is a separate caller-level
/// operation after a successful [`mark_as_requeued`](DeadLetterStore::mark_as_requeued).
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Capture a snapshot.
    async fn add(&self, entry: &DeadLetterJob) -> Result<()>;

    /// Fetch a snapshot by its own ID.
    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterJob>>;

    /// Fetch the snapshot taken from a given job, if any.
    async fn get_by_job_id(&self, job_id: Uuid) -> Result<Option<DeadLetterJob>>;

    /// All snapshots with the given failure reason.
    async fn get_by_failure_reason(&self, reason: FailureReason) -> Result<Vec<DeadLetterJob>>;

    /// Snapshots whose `failed_at` falls within `[start, end]` (inclusive).
    /// Fails if `start > end`.
    async fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterJob>>;

    /// Count of snapshots per failure reason.
    async fn failure_reason_statistics(&self) -> Result<BTreeMap<FailureReason, u64>>;

    /// Mark a snapshot as requeued. Returns false (and mutates nothing) if
    /// the entry does not exist or is already requeued.
    async fn mark_as_requeued(&self, id: Uuid, requeued_by: &str) -> Result<bool>;

    /// All snapshots, most recent failure first.
    async fn list(&self) -> Result<Vec<DeadLetterJob>>;
}
