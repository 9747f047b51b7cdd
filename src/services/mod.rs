//! External collaborator contracts for the pipeline.
//!
//! The orchestrator only ever talks to these traits; the concrete
//! implementations (yt-dlp, ffmpeg, Whisper) live in the sibling modules and
//! report failures as typed [`StageError`]s so retry decisions never depend
//! on message text.

mod audio;
mod whisper;
mod youtube;

pub use audio::{probe_duration, split_audio, FfmpegAudioExtractor};
pub use whisper::{is_api_key_configured, WhisperTranscriber};
pub use youtube::{extract_video_id, YtDlpDownloader};

use crate::error::StageError;
use crate::transcript::TranscriptionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result type for collaborator operations.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Receives progress percentages from long-running stage work.
///
/// Implementations must be cheap; collaborators may call this often.
pub trait ProgressSink: Send + Sync {
    /// Report progress in percent (0-100).
    fn report(&self, percent: f32);
}

/// Sink that discards all progress reports.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _percent: f32) {}
}

/// Sink that forwards progress over an unbounded channel.
///
/// Send failures are ignored: a dropped receiver just means nobody is
/// watching anymore.
pub struct ChannelSink(pub mpsc::UnboundedSender<f32>);

impl ProgressSink for ChannelSink {
    fn report(&self, percent: f32) {
        let _ = self.0.send(percent);
    }
}

/// Metadata about a video, as reported by the download tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Video identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Duration in seconds, if known.
    pub duration_seconds: Option<u32>,
    /// Channel or uploader name, if known.
    pub channel: Option<String>,
    /// Canonical watch URL.
    pub url: String,
}

/// Downloads media files for videos.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download the media file for a video into the given directory,
    /// reporting progress and honouring cancellation.
    async fn download(
        &self,
        video_id: &str,
        output_dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StageResult<PathBuf>;

    /// Fetch metadata for a video without downloading it.
    async fn fetch_metadata(&self, video_id: &str) -> StageResult<VideoMetadata>;
}

/// Extracts a normalised audio track from a downloaded media file.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(
        &self,
        media_path: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> StageResult<PathBuf>;
}

/// Transcribes an audio file into timed segments.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StageResult<TranscriptionResult>;
}

/// Run a subprocess to completion, killing it if the token fires first.
///
/// The child is spawned with piped output and `kill_on_drop`, so the
/// cancelled branch tears the process down when the future is dropped.
pub(crate) async fn run_with_cancel(
    mut command: tokio::process::Command,
    tool: &'static str,
    cancel: &CancellationToken,
) -> StageResult<std::process::Output> {
    use std::process::Stdio;

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StageError::ToolNotFound(tool.to_string())
        } else {
            StageError::ToolFailed(format!("{tool}: {e}"))
        }
    })?;

    tokio::select! {
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = child.wait_with_output() => {
            result.map_err(|e| StageError::ToolFailed(format!("{tool}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);

        sink.report(12.5);
        sink.report(99.0);

        assert_eq!(rx.recv().await, Some(12.5));
        assert_eq!(rx.recv().await, Some(99.0));
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink(tx);
        sink.report(50.0);
    }

    #[tokio::test]
    async fn test_run_with_cancel_honours_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut command = tokio::process::Command::new("sleep");
        command.arg("30");

        let result = run_with_cancel(command, "sleep", &cancel).await;
        assert!(matches!(result, Err(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_with_cancel_missing_tool() {
        let cancel = CancellationToken::new();
        let command = tokio::process::Command::new("definitely-not-a-real-tool");

        let result = run_with_cancel(command, "definitely-not-a-real-tool", &cancel).await;
        assert!(matches!(result, Err(StageError::ToolNotFound(_))));
    }
}
