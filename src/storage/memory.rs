//! In-memory store implementation, used by tests.

use super::{DeadLetterStore, JobStore, SegmentStore, VideoRecord, VideoStore};
use crate::dead_letter::{DeadLetterJob, FailureReason};
use crate::error::{Result, TolkError};
use crate::job::Job;
use crate::transcript::{TranscriptSegment, TranscriptionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory store backed by mutex-guarded maps.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    segments: Mutex<HashMap<String, Vec<TranscriptSegment>>>,
    videos: Mutex<HashMap<String, VideoRecord>>,
    transcripts: Mutex<HashMap<String, TranscriptionResult>>,
    dead_letters: Mutex<Vec<DeadLetterJob>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|e| TolkError::Storage(format!("Failed to acquire lock: {e}")))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        Self::lock(&self.jobs)?.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(Self::lock(&self.jobs)?.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut jobs = Self::lock(&self.jobs)?;
        if !jobs.contains_key(&job.id) {
            return Err(TolkError::JobNotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = Self::lock(&self.jobs)?;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn replace_for_video(
        &self,
        video_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<usize> {
        let mut map = Self::lock(&self.segments)?;
        map.insert(video_id.to_string(), segments.to_vec());
        Ok(segments.len())
    }

    async fn get_by_video_id(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        let map = Self::lock(&self.segments)?;
        let mut segments = map.get(video_id).cloned().unwrap_or_default();
        segments.sort_by_key(|s| s.segment_index);
        Ok(segments)
    }

    async fn count_for_video(&self, video_id: &str) -> Result<usize> {
        let map = Self::lock(&self.segments)?;
        Ok(map.get(video_id).map(|v| v.len()).unwrap_or(0))
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn upsert(&self, video: &VideoRecord) -> Result<()> {
        Self::lock(&self.videos)?.insert(video.id.clone(), video.clone());
        Ok(())
    }

    async fn get(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        Ok(Self::lock(&self.videos)?.get(video_id).cloned())
    }

    async fn store_raw_transcript(
        &self,
        video_id: &str,
        transcript: &TranscriptionResult,
    ) -> Result<()> {
        Self::lock(&self.transcripts)?.insert(video_id.to_string(), transcript.clone());
        Ok(())
    }

    async fn get_raw_transcript(&self, video_id: &str) -> Result<Option<TranscriptionResult>> {
        Ok(Self::lock(&self.transcripts)?.get(video_id).cloned())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn add(&self, entry: &DeadLetterJob) -> Result<()> {
        Self::lock(&self.dead_letters)?.push(entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterJob>> {
        let entries = Self::lock(&self.dead_letters)?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn get_by_job_id(&self, job_id: Uuid) -> Result<Option<DeadLetterJob>> {
        let entries = Self::lock(&self.dead_letters)?;
        Ok(entries.iter().find(|e| e.job_id == job_id).cloned())
    }

    async fn get_by_failure_reason(&self, reason: FailureReason) -> Result<Vec<DeadLetterJob>> {
        let entries = Self::lock(&self.dead_letters)?;
        Ok(entries
            .iter()
            .filter(|e| e.failure_reason == reason)
            .cloned()
            .collect())
    }

    async fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterJob>> {
        if start > end {
            return Err(TolkError::InvalidInput(format!(
                "date range start {start} is after end {end}"
            )));
        }

        let entries = Self::lock(&self.dead_letters)?;
        Ok(entries
            .iter()
            .filter(|e| e.failed_at >= start && e.failed_at <= end)
            .cloned()
            .collect())
    }

    async fn failure_reason_statistics(&self) -> Result<BTreeMap<FailureReason, u64>> {
        let entries = Self::lock(&self.dead_letters)?;
        let mut stats = BTreeMap::new();
        for entry in entries.iter() {
            *stats.entry(entry.failure_reason).or_insert(0u64) += 1;
        }
        Ok(stats)
    }

    async fn mark_as_requeued(&self, id: Uuid, requeued_by: &str) -> Result<bool> {
        let mut entries = Self::lock(&self.dead_letters)?;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if !entry.requeued => {
                entry.requeued = true;
                entry.requeued_at = Some(Utc::now());
                entry.requeued_by = Some(requeued_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<DeadLetterJob>> {
        let entries = Self::lock(&self.dead_letters)?;
        let mut all = entries.clone();
        all.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(all)
    }
}
