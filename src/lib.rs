//! Tolk - YouTube Transcription Pipeline
//!
//! A job pipeline that makes the spoken content of YouTube videos
//! searchable: videos are downloaded, their audio extracted, transcribed,
//! and split into persisted, integrity-checked transcript segments.
//!
//! The name "Tolk" comes from the Norwegian word for "interpreter."
//!
//! # Overview
//!
//! The interesting part is not the individual stages but how a long-running,
//! failure-prone unit of work is modelled: each job moves through a strict
//! stage order with weighted progress, typed failures are classified into
//! retry policies, and unrecoverable jobs are captured in a dead-letter
//! queue with enough context to requeue them later.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `job` - Job model, stage progress, failure classification
//! - `services` - External collaborators (yt-dlp, ffmpeg, Whisper)
//! - `orchestrator` - The per-job pipeline state machine
//! - `segmentation` - Transcript segmentation and integrity validation
//! - `dead_letter` - Dead-letter snapshots and requeueing
//! - `storage` - Trait-based stores (SQLite and in-memory)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tolk::config::Settings;
//! use tolk::job::{Job, JobParameters, JobType};
//! use tolk::orchestrator::PipelineOrchestrator;
//! use tolk::services::{FfmpegAudioExtractor, WhisperTranscriber, YtDlpDownloader};
//! use tolk::storage::{JobStore, SqliteStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);
//!
//!     let orchestrator = PipelineOrchestrator::new(
//!         &settings,
//!         store.clone(),
//!         store.clone(),
//!         store.clone(),
//!         store.clone(),
//!         Arc::new(YtDlpDownloader::new()),
//!         Arc::new(FfmpegAudioExtractor::new()),
//!         Arc::new(WhisperTranscriber::new()),
//!     )?;
//!
//!     let job = Job::new(
//!         "user-1",
//!         Some("dQw4w9WgXcQ".to_string()),
//!         JobType::TranscribeVideo,
//!         JobParameters::new(),
//!         settings.pipeline.max_retries,
//!     );
//!     store.insert(&job).await?;
//!
//!     // One invocation; a dispatcher re-invokes on RetryScheduled outcomes
//!     let outcome = orchestrator.execute(job.id, &CancellationToken::new()).await?;
//!     println!("{outcome:?}");
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod segmentation;
pub mod services;
pub mod storage;
pub mod transcript;

pub use error::{Result, StageError, TolkError};
