//! SQLite-backed store implementation.
//!
//! One connection guarded by a mutex, WAL mode for concurrent readers.
//! Structured fields (the stage-progress map, job parameters, raw
//! transcripts) are encoded as JSON text at this boundary and decoded on the
//! way out; everything else is plain columns.

use super::{DeadLetterStore, JobStore, SegmentStore, VideoRecord, VideoStatus, VideoStore};
use crate::dead_letter::{DeadLetterJob, DeadLetterPayload, FailureDetails, FailureReason};
use crate::error::{Result, TolkError};
use crate::job::{FailureCategory, Job, JobStatus, JobType, PipelineStage, StageProgress};
use crate::transcript::{TranscriptSegment, TranscriptionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    video_id TEXT,
    job_type TEXT NOT NULL,
    parameters TEXT NOT NULL,
    status TEXT NOT NULL,
    current_stage TEXT,
    stage_progress TEXT NOT NULL,
    overall_progress INTEGER NOT NULL,
    last_error_message TEXT,
    last_error_kind TEXT,
    last_failure_category TEXT,
    last_error_backtrace TEXT,
    failed_stage TEXT,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    next_retry_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    failed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

CREATE TABLE IF NOT EXISTS segments (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    segment_index INTEGER NOT NULL,
    start_seconds REAL NOT NULL,
    end_seconds REAL NOT NULL,
    text TEXT NOT NULL,
    confidence REAL,
    language TEXT,
    speaker TEXT
);

CREATE INDEX IF NOT EXISTS idx_segments_video_id ON segments(video_id);

CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY,
    title TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    transcribed_at TEXT
);

CREATE TABLE IF NOT EXISTS transcripts (
    video_id TEXT PRIMARY KEY,
    transcript_json TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dead_letters (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    failure_reason TEXT NOT NULL,
    error_kind TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_backtrace TEXT,
    payload_video_id TEXT,
    payload_job_type TEXT NOT NULL,
    payload_parameters TEXT NOT NULL,
    failed_at TEXT NOT NULL,
    attempted_retries INTEGER NOT NULL,
    requeued INTEGER NOT NULL DEFAULT 0,
    requeued_at TEXT,
    requeued_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_job_id ON dead_letters(job_id);
CREATE INDEX IF NOT EXISTS idx_dead_letters_reason ON dead_letters(failure_reason);
CREATE INDEX IF NOT EXISTS idx_dead_letters_failed_at ON dead_letters(failed_at);
"#;

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TolkError::Storage(format!("Failed to acquire lock: {e}")))
    }
}

fn decode_err(msg: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(msg.into())),
    )
}

fn encode_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn decode_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("bad timestamp {s:?}: {e}")))
}

fn decode_opt_dt(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(decode_dt).transpose()
}

fn decode_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| decode_err(format!("bad uuid {s:?}: {e}")))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get("id")?;
    let job_type: String = row.get("job_type")?;
    let parameters: String = row.get("parameters")?;
    let status: String = row.get("status")?;
    let current_stage: Option<String> = row.get("current_stage")?;
    let stage_progress: String = row.get("stage_progress")?;
    let last_failure_category: Option<String> = row.get("last_failure_category")?;
    let failed_stage: Option<String> = row.get("failed_stage")?;
    let next_retry_at: Option<String> = row.get("next_retry_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let failed_at: Option<String> = row.get("failed_at")?;

    Ok(Job {
        id: decode_uuid(&id)?,
        user_id: row.get("user_id")?,
        video_id: row.get("video_id")?,
        job_type: JobType::from_str(&job_type)
            .ok_or_else(|| decode_err(format!("unknown job type {job_type:?}")))?,
        parameters: serde_json::from_str(&parameters)
            .map_err(|e| decode_err(format!("bad parameters json: {e}")))?,
        status: JobStatus::from_str(&status)
            .ok_or_else(|| decode_err(format!("unknown status {status:?}")))?,
        current_stage: current_stage
            .as_deref()
            .map(|s| {
                PipelineStage::from_str(s)
                    .ok_or_else(|| decode_err(format!("unknown stage {s:?}")))
            })
            .transpose()?,
        stage_progress: serde_json::from_str::<StageProgress>(&stage_progress)
            .map_err(|e| decode_err(format!("bad stage progress json: {e}")))?,
        overall_progress: row.get("overall_progress")?,
        last_error_message: row.get("last_error_message")?,
        last_error_kind: row.get("last_error_kind")?,
        last_failure_category: last_failure_category
            .as_deref()
            .map(|s| {
                FailureCategory::from_str(s)
                    .ok_or_else(|| decode_err(format!("unknown category {s:?}")))
            })
            .transpose()?,
        last_error_backtrace: row.get("last_error_backtrace")?,
        failed_stage: failed_stage
            .as_deref()
            .map(|s| {
                PipelineStage::from_str(s)
                    .ok_or_else(|| decode_err(format!("unknown stage {s:?}")))
            })
            .transpose()?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        next_retry_at: decode_opt_dt(next_retry_at)?,
        created_at: decode_dt(&created_at)?,
        updated_at: decode_dt(&updated_at)?,
        started_at: decode_opt_dt(started_at)?,
        completed_at: decode_opt_dt(completed_at)?,
        failed_at: decode_opt_dt(failed_at)?,
    })
}

/// Positional parameter list shared by insert and update; ?1 is the id.
macro_rules! job_params {
    ($job:expr) => {
        params![
            $job.id.to_string(),
            $job.user_id,
            $job.video_id,
            $job.job_type.as_str(),
            serde_json::to_string(&$job.parameters)?,
            $job.status.as_str(),
            $job.current_stage.map(|s| s.as_str()),
            serde_json::to_string(&$job.stage_progress)?,
            $job.overall_progress,
            $job.last_error_message,
            $job.last_error_kind,
            $job.last_failure_category.map(|c| c.as_str()),
            $job.last_error_backtrace,
            $job.failed_stage.map(|s| s.as_str()),
            $job.retry_count,
            $job.max_retries,
            $job.next_retry_at.as_ref().map(encode_dt),
            encode_dt(&$job.created_at),
            encode_dt(&$job.updated_at),
            $job.started_at.as_ref().map(encode_dt),
            $job.completed_at.as_ref().map(encode_dt),
            $job.failed_at.as_ref().map(encode_dt),
        ]
    };
}

const JOB_COLUMNS: &str = "id, user_id, video_id, job_type, parameters, status, current_stage, \
     stage_progress, overall_progress, last_error_message, last_error_kind, \
     last_failure_category, last_error_backtrace, failed_stage, retry_count, \
     max_retries, next_retry_at, created_at, updated_at, started_at, completed_at, failed_at";

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                  ?18, ?19, ?20, ?21, ?22)"
            ),
            job_params!(job),
        )?;
        debug!("Inserted job {}", job.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], job_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn update(&self, job: &Job) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET user_id = ?2, video_id = ?3, job_type = ?4, parameters = ?5, \
             status = ?6, current_stage = ?7, stage_progress = ?8, overall_progress = ?9, \
             last_error_message = ?10, last_error_kind = ?11, last_failure_category = ?12, \
             last_error_backtrace = ?13, failed_stage = ?14, retry_count = ?15, \
             max_retries = ?16, next_retry_at = ?17, created_at = ?18, updated_at = ?19, \
             started_at = ?20, completed_at = ?21, failed_at = ?22 \
             WHERE id = ?1",
            job_params!(job),
        )?;

        if changed == 0 {
            return Err(TolkError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], job_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptSegment> {
    let id: String = row.get("id")?;
    let confidence: Option<f64> = row.get("confidence")?;

    Ok(TranscriptSegment {
        id: decode_uuid(&id)?,
        video_id: row.get("video_id")?,
        segment_index: row.get("segment_index")?,
        start_seconds: row.get("start_seconds")?,
        end_seconds: row.get("end_seconds")?,
        text: row.get("text")?,
        confidence: confidence.map(|c| c as f32),
        language: row.get("language")?,
        speaker: row.get("speaker")?,
    })
}

#[async_trait]
impl SegmentStore for SqliteStore {
    /// Delete-then-insert inside one transaction so a partial segment set is
    /// never visible.
    #[instrument(skip(self, segments), fields(video_id = %video_id, count = segments.len()))]
    async fn replace_for_video(
        &self,
        video_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute("DELETE FROM segments WHERE video_id = ?1", params![video_id])?;

        for segment in segments {
            tx.execute(
                "INSERT INTO segments \
                 (id, video_id, segment_index, start_seconds, end_seconds, text, confidence, \
                  language, speaker) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    segment.id.to_string(),
                    segment.video_id,
                    segment.segment_index,
                    segment.start_seconds,
                    segment.end_seconds,
                    segment.text,
                    segment.confidence.map(|c| c as f64),
                    segment.language,
                    segment.speaker,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Replaced segments for {}", video_id);
        Ok(segments.len())
    }

    async fn get_by_video_id(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, segment_index, start_seconds, end_seconds, text, confidence, \
             language, speaker FROM segments WHERE video_id = ?1 ORDER BY segment_index",
        )?;
        let rows = stmt.query_map(params![video_id], segment_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn count_for_video(&self, video_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM segments WHERE video_id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl VideoStore for SqliteStore {
    async fn upsert(&self, video: &VideoRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO videos (id, title, status, created_at, updated_at, \
             transcribed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                video.id,
                video.title,
                video.status.as_str(),
                encode_dt(&video.created_at),
                encode_dt(&video.updated_at),
                video.transcribed_at.as_ref().map(encode_dt),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, status, created_at, updated_at, transcribed_at \
             FROM videos WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![video_id], |row| {
            let status: String = row.get("status")?;
            let created_at: String = row.get("created_at")?;
            let updated_at: String = row.get("updated_at")?;
            let transcribed_at: Option<String> = row.get("transcribed_at")?;

            Ok(VideoRecord {
                id: row.get("id")?,
                title: row.get("title")?,
                status: VideoStatus::from_str(&status)
                    .ok_or_else(|| decode_err(format!("unknown video status {status:?}")))?,
                created_at: decode_dt(&created_at)?,
                updated_at: decode_dt(&updated_at)?,
                transcribed_at: decode_opt_dt(transcribed_at)?,
            })
        })?;
        rows.next().transpose().map_err(Into::into)
    }

    async fn store_raw_transcript(
        &self,
        video_id: &str,
        transcript: &TranscriptionResult,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO transcripts (video_id, transcript_json, stored_at) \
             VALUES (?1, ?2, ?3)",
            params![
                video_id,
                serde_json::to_string(transcript)?,
                encode_dt(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    async fn get_raw_transcript(&self, video_id: &str) -> Result<Option<TranscriptionResult>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT transcript_json FROM transcripts WHERE video_id = ?1",
                params![video_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn dead_letter_from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetterJob> {
    let id: String = row.get("id")?;
    let job_id: String = row.get("job_id")?;
    let failure_reason: String = row.get("failure_reason")?;
    let payload_job_type: String = row.get("payload_job_type")?;
    let payload_parameters: String = row.get("payload_parameters")?;
    let failed_at: String = row.get("failed_at")?;
    let requeued_at: Option<String> = row.get("requeued_at")?;

    Ok(DeadLetterJob {
        id: decode_uuid(&id)?,
        job_id: decode_uuid(&job_id)?,
        user_id: row.get("user_id")?,
        failure_reason: FailureReason::from_str(&failure_reason)
            .ok_or_else(|| decode_err(format!("unknown failure reason {failure_reason:?}")))?,
        details: FailureDetails {
            error_kind: row.get("error_kind")?,
            message: row.get("error_message")?,
            backtrace: row.get("error_backtrace")?,
        },
        payload: DeadLetterPayload {
            video_id: row.get("payload_video_id")?,
            job_type: JobType::from_str(&payload_job_type)
                .ok_or_else(|| decode_err(format!("unknown job type {payload_job_type:?}")))?,
            parameters: serde_json::from_str(&payload_parameters)
                .map_err(|e| decode_err(format!("bad payload json: {e}")))?,
        },
        failed_at: decode_dt(&failed_at)?,
        attempted_retries: row.get("attempted_retries")?,
        requeued: row.get("requeued")?,
        requeued_at: decode_opt_dt(requeued_at)?,
        requeued_by: row.get("requeued_by")?,
    })
}

const DEAD_LETTER_COLUMNS: &str = "id, job_id, user_id, failure_reason, error_kind, \
     error_message, error_backtrace, payload_video_id, payload_job_type, payload_parameters, \
     failed_at, attempted_retries, requeued, requeued_at, requeued_by";

#[async_trait]
impl DeadLetterStore for SqliteStore {
    #[instrument(skip(self, entry), fields(job_id = %entry.job_id))]
    async fn add(&self, entry: &DeadLetterJob) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO dead_letters ({DEAD_LETTER_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                entry.id.to_string(),
                entry.job_id.to_string(),
                entry.user_id,
                entry.failure_reason.as_str(),
                entry.details.error_kind,
                entry.details.message,
                entry.details.backtrace,
                entry.payload.video_id,
                entry.payload.job_type.as_str(),
                serde_json::to_string(&entry.payload.parameters)?,
                encode_dt(&entry.failed_at),
                entry.attempted_retries,
                entry.requeued,
                entry.requeued_at.as_ref().map(encode_dt),
                entry.requeued_by,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id.to_string()], dead_letter_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    async fn get_by_job_id(&self, job_id: Uuid) -> Result<Option<DeadLetterJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE job_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![job_id.to_string()], dead_letter_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    async fn get_by_failure_reason(&self, reason: FailureReason) -> Result<Vec<DeadLetterJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE failure_reason = ?1 \
             ORDER BY failed_at DESC"
        ))?;
        let rows = stmt.query_map(params![reason.as_str()], dead_letter_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
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

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters \
             WHERE failed_at >= ?1 AND failed_at <= ?2 ORDER BY failed_at"
        ))?;
        let rows = stmt.query_map(
            params![encode_dt(&start), encode_dt(&end)],
            dead_letter_from_row,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn failure_reason_statistics(&self) -> Result<BTreeMap<FailureReason, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT failure_reason, COUNT(*) FROM dead_letters GROUP BY failure_reason",
        )?;
        let rows = stmt.query_map([], |row| {
            let reason: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((reason, count))
        })?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (reason, count) = row?;
            let reason = FailureReason::from_str(&reason).ok_or_else(|| {
                TolkError::Storage(format!("unknown failure reason {reason:?}"))
            })?;
            stats.insert(reason, count as u64);
        }
        Ok(stats)
    }

    async fn mark_as_requeued(&self, id: Uuid, requeued_by: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE dead_letters SET requeued = 1, requeued_at = ?1, requeued_by = ?2 \
             WHERE id = ?3 AND requeued = 0",
            params![encode_dt(&Utc::now()), requeued_by, id.to_string()],
        )?;
        Ok(changed == 1)
    }

    async fn list(&self) -> Result<Vec<DeadLetterJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters ORDER BY failed_at DESC"
        ))?;
        let rows = stmt.query_map([], dead_letter_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageWeightSettings;
    use crate::error::StageError;
    use crate::job::JobParameters;
    use crate::transcript::RawSegment;

    fn sample_job() -> Job {
        let mut parameters = JobParameters::new();
        parameters.insert("media_path".into(), "/tmp/x.media".into());
        Job::new(
            "user-1",
            Some("video-1".into()),
            JobType::TranscribeVideo,
            parameters,
            3,
        )
    }

    #[tokio::test]
    async fn test_job_roundtrip_preserves_progress_map() {
        let store = SqliteStore::in_memory().unwrap();
        let weights = StageWeightSettings::default();

        let mut job = sample_job();
        job.begin_stage(PipelineStage::Download, &weights);
        job.complete_stage(PipelineStage::Download, &weights);
        job.begin_stage(PipelineStage::AudioExtraction, &weights);
        job.set_stage_progress(PipelineStage::AudioExtraction, 40.0, &weights);

        store.insert(&job).await.unwrap();
        let loaded = JobStore::get(&store, job.id).await.unwrap().unwrap();

        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.current_stage, Some(PipelineStage::AudioExtraction));
        assert_eq!(loaded.stage_progress, job.stage_progress);
        assert_eq!(loaded.overall_progress, 26);
        assert_eq!(loaded.parameters, job.parameters);
    }

    #[tokio::test]
    async fn test_job_update_missing_row_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();
        assert!(matches!(
            store.update(&job).await,
            Err(TolkError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_segment_replace_is_full_replace() {
        let store = SqliteStore::in_memory().unwrap();

        let first: Vec<TranscriptSegment> = (0..4)
            .map(|i| {
                TranscriptSegment::new("video-1", i, i as f64, (i + 1) as f64, format!("seg {i}"))
            })
            .collect();
        store.replace_for_video("video-1", &first).await.unwrap();
        assert_eq!(store.count_for_video("video-1").await.unwrap(), 4);

        let second: Vec<TranscriptSegment> = (0..2)
            .map(|i| {
                TranscriptSegment::new("video-1", i, i as f64, (i + 1) as f64, format!("new {i}"))
            })
            .collect();
        let inserted = store.replace_for_video("video-1", &second).await.unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.count_for_video("video-1").await.unwrap(), 2);

        let loaded = store.get_by_video_id("video-1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].text, "new 0");
        assert_eq!(loaded[0].segment_index, 0);
    }

    #[tokio::test]
    async fn test_raw_transcript_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let transcript = TranscriptionResult::new(
            vec![RawSegment::new(0.0, 4.0, "hello")],
            Some("en".into()),
        );

        store
            .store_raw_transcript("video-1", &transcript)
            .await
            .unwrap();
        let loaded = store.get_raw_transcript("video-1").await.unwrap().unwrap();

        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.language.as_deref(), Some("en"));
        assert!(store.get_raw_transcript("video-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_roundtrip_and_requeue_guard() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();
        let entry = DeadLetterJob::from_job(
            &job,
            FailureReason::NonRetryable,
            &StageError::NotFound("gone".into()),
        );

        store.add(&entry).await.unwrap();

        let by_job = store.get_by_job_id(job.id).await.unwrap().unwrap();
        assert_eq!(by_job.id, entry.id);
        assert_eq!(by_job.details.error_kind, "not_found");
        assert_eq!(by_job.payload.parameters, job.parameters);

        assert!(store.mark_as_requeued(entry.id, "op").await.unwrap());
        assert!(!store.mark_as_requeued(entry.id, "op").await.unwrap());

        let reloaded = DeadLetterStore::get(&store, entry.id).await.unwrap().unwrap();
        assert!(reloaded.requeued);
        assert!(reloaded.requeued_at.is_some());
    }

    #[tokio::test]
    async fn test_dead_letter_queries() {
        let store = SqliteStore::in_memory().unwrap();
        let job = sample_job();

        for reason in [
            FailureReason::NonRetryable,
            FailureReason::NonRetryable,
            FailureReason::RetriesExhausted,
        ] {
            let entry =
                DeadLetterJob::from_job(&job, reason, &StageError::Network("down".into()));
            store.add(&entry).await.unwrap();
        }

        let non_retryable = store
            .get_by_failure_reason(FailureReason::NonRetryable)
            .await
            .unwrap();
        assert_eq!(non_retryable.len(), 2);

        let stats = store.failure_reason_statistics().await.unwrap();
        assert_eq!(stats.values().sum::<u64>(), 3);

        let now = Utc::now();
        let all = store
            .get_by_date_range(now - chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        assert!(store
            .get_by_date_range(now, now - chrono::Duration::minutes(5))
            .await
            .is_err());
    }
}
