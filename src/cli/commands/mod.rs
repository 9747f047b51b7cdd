//! CLI command implementations.

mod dlq;
mod process;
mod status;

pub use dlq::run_dlq;
pub use process::run_process;
pub use status::run_status;

use crate::config::Settings;
use crate::error::Result;
use crate::orchestrator::PipelineOrchestrator;
use crate::services::{FfmpegAudioExtractor, WhisperTranscriber, YtDlpDownloader};
use crate::storage::SqliteStore;
use std::sync::Arc;

/// Open the store and wire up a production orchestrator.
pub(crate) fn build_pipeline(
    settings: &Settings,
) -> Result<(Arc<SqliteStore>, PipelineOrchestrator)> {
    let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);

    let orchestrator = PipelineOrchestrator::new(
        settings,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(YtDlpDownloader::new()),
        Arc::new(FfmpegAudioExtractor::new()),
        Arc::new(WhisperTranscriber::with_config(
            &settings.transcription.model,
            settings.transcription.chunk_duration_seconds,
            settings.transcription.max_concurrent_chunks,
        )),
    )?;

    Ok((store, orchestrator))
}
