//! Job pipeline orchestrator.
//!
//! Drives a job through Download -> AudioExtraction -> Transcription ->
//! Segmentation, one invocation at a time. Each invocation resumes from the
//! job's current stage, so a retry never repeats work a previous attempt
//! durably finished. The orchestrator never self-schedules: on a transient
//! failure it computes `next_retry_at` and returns, leaving the actual
//! re-invocation to the dispatcher.

use crate::config::{Settings, StageWeightSettings};
use crate::dead_letter::{DeadLetterJob, FailureReason};
use crate::error::{Result, StageError, TolkError};
use crate::job::{FailureClassifier, Job, JobStatus, PipelineStage};
use crate::segmentation::SegmentationProcessor;
use crate::services::{
    AudioExtractor, ChannelSink, MediaDownloader, ProgressSink, StageResult, Transcriber,
};
use crate::storage::{
    DeadLetterStore, JobStore, SegmentStore, VideoRecord, VideoStatus, VideoStore,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Parameter keys used for artifact hand-off between invocations.
const PARAM_MEDIA_PATH: &str = "media_path";
const PARAM_AUDIO_PATH: &str = "audio_path";

/// What an invocation decided about the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// All stages finished; the job is Completed.
    Completed,
    /// A transient failure occurred; the dispatcher should re-invoke at or
    /// after `next_retry_at`.
    RetryScheduled {
        stage: PipelineStage,
        next_retry_at: DateTime<Utc>,
    },
    /// The job failed permanently; a dead-letter snapshot was captured.
    Failed {
        stage: PipelineStage,
        reason: FailureReason,
    },
    /// The job was already terminal when invoked; nothing was done.
    AlreadyTerminal { status: JobStatus },
}

/// Drives jobs through the pipeline.
pub struct PipelineOrchestrator {
    jobs: Arc<dyn JobStore>,
    videos: Arc<dyn VideoStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    downloader: Arc<dyn MediaDownloader>,
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn Transcriber>,
    segmentation: SegmentationProcessor,
    classifier: FailureClassifier,
    weights: StageWeightSettings,
    language: Option<String>,
    work_dir: PathBuf,
}

impl PipelineOrchestrator {
    /// Wire up an orchestrator. Fails if the configured stage weights do not
    /// total 100.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        jobs: Arc<dyn JobStore>,
        videos: Arc<dyn VideoStore>,
        segments: Arc<dyn SegmentStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        downloader: Arc<dyn MediaDownloader>,
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self> {
        settings.pipeline.stage_weights.validate()?;

        let segmentation = SegmentationProcessor::new(
            segments,
            videos.clone(),
            settings.segmentation.clone(),
        );

        Ok(Self {
            jobs,
            videos,
            dead_letters,
            downloader,
            extractor,
            transcriber,
            segmentation,
            classifier: FailureClassifier::new(&settings.pipeline),
            weights: settings.pipeline.stage_weights,
            language: settings.transcription.language.clone(),
            work_dir: settings.temp_dir(),
        })
    }

    /// Execute one invocation of a job.
    ///
    /// Safe to call again for a job in any state: terminal jobs are left
    /// untouched, Running/Retrying jobs resume from their current stage.
    /// Cancellation propagates as [`TolkError::Cancelled`] without moving
    /// the job to a terminal status.
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn execute(
        &self,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(TolkError::JobNotFound(job_id))?;

        if job.is_terminal() {
            info!("Job already {}, nothing to do", job.status);
            return Ok(PipelineOutcome::AlreadyTerminal { status: job.status });
        }

        while let Some(stage) = job.resume_stage() {
            if cancel.is_cancelled() {
                return Err(TolkError::Cancelled);
            }

            info!("Entering stage {}", stage);
            job.begin_stage(stage, &self.weights);
            self.jobs.update(&job).await?;

            match self.run_stage(&mut job, stage, cancel).await {
                Ok(()) => {
                    job.complete_stage(stage, &self.weights);
                    self.jobs.update(&job).await?;
                }
                Err(error) if error.is_cancelled() => {
                    info!("Stage {} cancelled, leaving job resumable", stage);
                    return Err(TolkError::Cancelled);
                }
                Err(error) => {
                    return self.handle_failure(&mut job, stage, error).await;
                }
            }
        }

        job.mark_completed();
        self.jobs.update(&job).await?;
        info!("Job completed");
        Ok(PipelineOutcome::Completed)
    }

    /// Execute the body of one stage.
    async fn run_stage(
        &self,
        job: &mut Job,
        stage: PipelineStage,
        cancel: &CancellationToken,
    ) -> StageResult<()> {
        let video_id = job
            .video_id
            .clone()
            .ok_or_else(|| StageError::InvalidInput("job has no target video".to_string()))?;

        let stage_dir = self.work_dir.join(&video_id);

        match stage {
            PipelineStage::Download => {
                self.ensure_video_record(&video_id).await?;

                let (tx, rx) = mpsc::unbounded_channel();
                let sink = ChannelSink(tx);
                let path = {
                    let fut = self.downloader.download(&video_id, &stage_dir, &sink, cancel);
                    self.drive(job, stage, fut, rx).await?
                };

                job.parameters.insert(
                    PARAM_MEDIA_PATH.to_string(),
                    path.to_string_lossy().into_owned().into(),
                );
                Ok(())
            }
            PipelineStage::AudioExtraction => {
                let media_path = self.artifact_path(job, PARAM_MEDIA_PATH)?;
                let path = self.extractor.extract(&media_path, &stage_dir, cancel).await?;

                job.parameters.insert(
                    PARAM_AUDIO_PATH.to_string(),
                    path.to_string_lossy().into_owned().into(),
                );
                Ok(())
            }
            PipelineStage::Transcription => {
                let audio_path = self.artifact_path(job, PARAM_AUDIO_PATH)?;

                let (tx, rx) = mpsc::unbounded_channel();
                let sink = ChannelSink(tx);
                let transcription = {
                    let fut = self.transcriber.transcribe(
                        &audio_path,
                        self.language.as_deref(),
                        &sink,
                        cancel,
                    );
                    self.drive(job, stage, fut, rx).await?
                };

                // Persist the raw result so segmentation can resume in a
                // later invocation without re-transcribing.
                self.videos
                    .store_raw_transcript(&video_id, &transcription)
                    .await
                    .map_err(storage_error)?;
                Ok(())
            }
            PipelineStage::Segmentation => {
                let transcription = self
                    .videos
                    .get_raw_transcript(&video_id)
                    .await
                    .map_err(storage_error)?
                    .ok_or_else(|| {
                        StageError::InvalidInput(format!(
                            "no stored transcript for video {video_id}"
                        ))
                    })?;

                let (tx, rx) = mpsc::unbounded_channel();
                let sink = ChannelSink(tx);
                let fut = self
                    .segmentation
                    .run(&video_id, &transcription, &sink, cancel);
                self.drive(job, stage, fut, rx).await?;
                Ok(())
            }
            PipelineStage::Completed => Ok(()),
        }
    }

    /// Run a stage future while pumping its progress reports into the job
    /// row. All writes happen on this task, so the single-writer-per-job
    /// guarantee holds.
    async fn drive<T>(
        &self,
        job: &mut Job,
        stage: PipelineStage,
        fut: impl Future<Output = StageResult<T>>,
        mut rx: mpsc::UnboundedReceiver<f32>,
    ) -> StageResult<T> {
        tokio::pin!(fut);
        let mut last_persisted = 0.0f32;

        loop {
            tokio::select! {
                result = &mut fut => return result,
                Some(percent) = rx.recv() => {
                    // Throttle row writes to whole-percent movements
                    if percent - last_persisted >= 1.0 {
                        last_persisted = percent;
                        job.set_stage_progress(stage, percent, &self.weights);
                        if let Err(e) = self.jobs.update(job).await {
                            warn!("Failed to persist progress: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Create the video record on first contact, marked Processing.
    async fn ensure_video_record(&self, video_id: &str) -> StageResult<()> {
        if self
            .videos
            .get(video_id)
            .await
            .map_err(storage_error)?
            .is_some()
        {
            return Ok(());
        }

        let title = match self.downloader.fetch_metadata(video_id).await {
            Ok(meta) => Some(meta.title),
            // Permanent failures must surface; anything else is retried by
            // the download itself soon enough.
            Err(
                e @ (StageError::NotFound(_)
                | StageError::AccessDenied(_)
                | StageError::InvalidInput(_)),
            ) => return Err(e),
            Err(e) => {
                warn!("Metadata fetch failed, continuing without title: {}", e);
                None
            }
        };

        let mut record = VideoRecord::new(video_id, title);
        record.status = VideoStatus::Processing;
        self.videos.upsert(&record).await.map_err(storage_error)
    }

    fn artifact_path(&self, job: &Job, key: &str) -> StageResult<PathBuf> {
        job.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| {
                StageError::InvalidInput(format!("job is missing the {key} artifact"))
            })
    }

    /// Decide between retry and dead-letter for a failed stage.
    async fn handle_failure(
        &self,
        job: &mut Job,
        stage: PipelineStage,
        error: StageError,
    ) -> Result<PipelineOutcome> {
        job.retry_count += 1;
        let policy = self.classifier.policy(&error);
        job.record_failure(&error, policy.category);

        let effective_max = policy.max_retries.min(job.max_retries);

        if !policy.dead_letter && job.retry_count < effective_max {
            let delay = policy.backoff_delay(job.retry_count);
            let next_retry_at = Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);

            job.mark_retrying(next_retry_at);
            self.jobs.update(job).await?;

            warn!(
                "Stage {} failed ({}), retry {}/{} at {}: {}",
                stage, policy.category, job.retry_count, effective_max, next_retry_at, error
            );
            return Ok(PipelineOutcome::RetryScheduled {
                stage,
                next_retry_at,
            });
        }

        // Retries exhausted or the category mandates immediate capture.
        let reason = FailureReason::from_category(policy.category, !policy.dead_letter);
        let snapshot = DeadLetterJob::from_job(job, reason, &error);
        self.dead_letters.add(&snapshot).await?;

        job.mark_failed(stage);
        self.jobs.update(job).await?;
        self.mark_video_failed(job).await;

        warn!(
            "Stage {} failed permanently ({}), dead-lettered as {}: {}",
            stage, reason, snapshot.id, error
        );
        Ok(PipelineOutcome::Failed { stage, reason })
    }

    async fn mark_video_failed(&self, job: &Job) {
        let Some(video_id) = &job.video_id else {
            return;
        };
        match self.videos.get(video_id).await {
            Ok(Some(mut video)) => {
                video.status = VideoStatus::Failed;
                video.updated_at = Utc::now();
                if let Err(e) = self.videos.upsert(&video).await {
                    warn!("Failed to mark video {} failed: {}", video_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load video {}: {}", video_id, e),
        }
    }
}

fn storage_error(e: TolkError) -> StageError {
    StageError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobParameters, JobType};
    use crate::services::VideoMetadata;
    use crate::storage::MemoryStore;
    use crate::transcript::{RawSegment, TranscriptionResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Shared scripted state for the service stubs: pre-loaded errors are
    /// popped before a call succeeds.
    #[derive(Default)]
    struct StubState {
        download_calls: AtomicU32,
        extract_calls: AtomicU32,
        transcribe_calls: AtomicU32,
        download_errors: Mutex<VecDeque<StageError>>,
        extract_errors: Mutex<VecDeque<StageError>>,
        transcribe_errors: Mutex<VecDeque<StageError>>,
        transcription: Mutex<Option<TranscriptionResult>>,
    }

    impl StubState {
        fn pop(queue: &Mutex<VecDeque<StageError>>) -> Option<StageError> {
            queue.lock().unwrap().pop_front()
        }
    }

    struct StubDownloader(Arc<StubState>);

    #[async_trait]
    impl MediaDownloader for StubDownloader {
        async fn download(
            &self,
            _video_id: &str,
            _output_dir: &Path,
            progress: &dyn ProgressSink,
            _cancel: &CancellationToken,
        ) -> StageResult<PathBuf> {
            self.0.download_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = StubState::pop(&self.0.download_errors) {
                return Err(error);
            }
            progress.report(50.0);
            Ok(PathBuf::from("/tmp/stub/video.media"))
        }

        async fn fetch_metadata(&self, video_id: &str) -> StageResult<VideoMetadata> {
            Ok(VideoMetadata {
                id: video_id.to_string(),
                title: "Stub Video".to_string(),
                duration_seconds: Some(60),
                channel: None,
                url: format!("https://example.com/{video_id}"),
            })
        }
    }

    struct StubExtractor(Arc<StubState>);

    #[async_trait]
    impl AudioExtractor for StubExtractor {
        async fn extract(
            &self,
            _media_path: &Path,
            _output_dir: &Path,
            _cancel: &CancellationToken,
        ) -> StageResult<PathBuf> {
            self.0.extract_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = StubState::pop(&self.0.extract_errors) {
                return Err(error);
            }
            Ok(PathBuf::from("/tmp/stub/audio.mp3"))
        }
    }

    struct StubTranscriber(Arc<StubState>);

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _language: Option<&str>,
            progress: &dyn ProgressSink,
            _cancel: &CancellationToken,
        ) -> StageResult<TranscriptionResult> {
            self.0.transcribe_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = StubState::pop(&self.0.transcribe_errors) {
                return Err(error);
            }
            progress.report(100.0);
            let scripted = self.0.transcription.lock().unwrap().clone();
            Ok(scripted.unwrap_or_else(|| {
                TranscriptionResult::new(
                    vec![
                        RawSegment::new(0.0, 4.0, "hello there"),
                        RawSegment::new(4.0, 9.0, "general conversation"),
                    ],
                    Some("en".to_string()),
                )
            }))
        }
    }

    struct Fixture {
        orchestrator: PipelineOrchestrator,
        store: Arc<MemoryStore>,
        state: Arc<StubState>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(StubState::default());

        let orchestrator = PipelineOrchestrator::new(
            &Settings::default(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(StubDownloader(state.clone())),
            Arc::new(StubExtractor(state.clone())),
            Arc::new(StubTranscriber(state.clone())),
        )
        .unwrap();

        Fixture {
            orchestrator,
            store,
            state,
        }
    }

    async fn enqueue(store: &MemoryStore) -> Job {
        let job = Job::new(
            "user-1",
            Some("video-1".to_string()),
            JobType::TranscribeVideo,
            JobParameters::new(),
            3,
        );
        store.insert(&job).await.unwrap();
        job
    }

    async fn load(store: &MemoryStore, id: Uuid) -> Job {
        JobStore::get(store, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_completes_with_full_progress() {
        let f = fixture();
        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);

        let job = load(&f.store, job.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.overall_progress, 100);
        assert!(job.completed_at.is_some());

        assert_eq!(f.state.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.extract_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.transcribe_calls.load(Ordering::SeqCst), 1);

        assert_eq!(f.store.count_for_video("video-1").await.unwrap(), 2);
        let video = VideoStore::get(f.store.as_ref(), "video-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(video.status, VideoStatus::Completed);
        assert!(video.transcribed_at.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry_with_backoff() {
        let f = fixture();
        f.state
            .download_errors
            .lock()
            .unwrap()
            .push_back(StageError::Network("reset".to_string()));

        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        let before = Utc::now();
        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();

        let PipelineOutcome::RetryScheduled {
            stage,
            next_retry_at,
        } = outcome
        else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(stage, PipelineStage::Download);

        // First transient retry waits ~10 seconds
        let delay = (next_retry_at - before).num_seconds();
        assert!((9..=11).contains(&delay), "unexpected delay {delay}s");

        let job = load(&f.store, job.id).await;
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.next_retry_at, Some(next_retry_at));
        assert_eq!(job.last_error_kind.as_deref(), Some("network"));
    }

    #[tokio::test]
    async fn test_retry_resumes_from_failed_stage() {
        let f = fixture();
        f.state
            .transcribe_errors
            .lock()
            .unwrap()
            .push_back(StageError::Timeout("slow api".to_string()));

        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert!(matches!(
            outcome,
            PipelineOutcome::RetryScheduled {
                stage: PipelineStage::Transcription,
                ..
            }
        ));
        assert_eq!(f.state.download_calls.load(Ordering::SeqCst), 1);

        // Re-invocation resumes at Transcription, not Download
        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(f.state.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.extract_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.transcribe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let f = fixture();
        f.state
            .download_errors
            .lock()
            .unwrap()
            .push_back(StageError::NotFound("video deleted".to_string()));

        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Failed {
                stage: PipelineStage::Download,
                reason: FailureReason::NonRetryable,
            }
        );

        let job = load(&f.store, job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_stage, Some(PipelineStage::Download));
        assert_eq!(job.retry_count, 1);

        let entry = f.store.get_by_job_id(job.id).await.unwrap().unwrap();
        assert_eq!(entry.failure_reason, FailureReason::NonRetryable);
        assert_eq!(entry.details.error_kind, "not_found");
        assert_eq!(entry.payload.video_id.as_deref(), Some("video-1"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let f = fixture();
        {
            let mut errors = f.state.download_errors.lock().unwrap();
            for _ in 0..3 {
                errors.push_back(StageError::Network("flaky".to_string()));
            }
        }

        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        for expected_retry in 1..=2u32 {
            let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
            assert!(
                matches!(outcome, PipelineOutcome::RetryScheduled { .. }),
                "attempt {expected_retry} should schedule a retry"
            );
        }

        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Failed {
                stage: PipelineStage::Download,
                reason: FailureReason::RetriesExhausted,
            }
        );

        let job = load(&f.store, job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);

        let entry = f.store.get_by_job_id(job.id).await.unwrap().unwrap();
        assert_eq!(entry.attempted_retries, 3);
    }

    #[tokio::test]
    async fn test_integrity_violation_is_fatal_with_distinct_reason() {
        let f = fixture();
        // Empty transcription makes segmentation fail its hard checks
        *f.state.transcription.lock().unwrap() =
            Some(TranscriptionResult::new(Vec::new(), None));

        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();

        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Failed {
                stage: PipelineStage::Segmentation,
                reason: FailureReason::IntegrityViolation,
            }
        );

        let entry = f.store.get_by_job_id(job.id).await.unwrap().unwrap();
        assert_eq!(entry.failure_reason, FailureReason::IntegrityViolation);
    }

    #[tokio::test]
    async fn test_cancellation_propagates_without_terminal_status() {
        let f = fixture();
        let job = enqueue(&f.store).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f.orchestrator.execute(job.id, &cancel).await;
        assert!(matches!(result, Err(TolkError::Cancelled)));

        let job = load(&f.store, job.id).await;
        assert!(!job.is_terminal());
        assert_eq!(f.state.download_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_job_is_left_untouched() {
        let f = fixture();
        let mut job = enqueue(&f.store).await;
        job.mark_completed();
        f.store.update(&job).await.unwrap();

        let cancel = CancellationToken::new();
        let outcome = f.orchestrator.execute(job.id, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::AlreadyTerminal {
                status: JobStatus::Completed
            }
        );
        assert_eq!(f.state.download_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_an_error() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let result = f.orchestrator.execute(Uuid::new_v4(), &cancel).await;
        assert!(matches!(result, Err(TolkError::JobNotFound(_))));
    }
}
