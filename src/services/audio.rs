//! Audio extraction and processing via ffmpeg.

use super::{run_with_cancel, AudioExtractor, StageResult};
use crate::error::StageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// ffmpeg-based audio extractor.
///
/// Produces a normalised MP3 track from whatever container the download
/// stage fetched.
pub struct FfmpegAudioExtractor;

impl FfmpegAudioExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegAudioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    /// Extract the audio track as MP3. Reuses an existing output file from a
    /// previous attempt.
    #[instrument(skip(self, cancel), fields(media_path = %media_path.display()))]
    async fn extract(
        &self,
        media_path: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> StageResult<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| StageError::ToolFailed(format!("cannot create {output_dir:?}: {e}")))?;

        let stem = media_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let target_path = output_dir.join(format!("{}.mp3", stem));

        if target_path.exists() {
            info!("Using cached audio file");
            return Ok(target_path);
        }

        info!("Extracting audio from {:?}", media_path);

        // Write to a scratch name first so a killed run never leaves a
        // half-written file at the cached target path.
        let partial_path = output_dir.join(format!("{}.partial.mp3", stem));

        let mut command = tokio::process::Command::new("ffmpeg");
        command
            .arg("-i").arg(media_path)
            .arg("-vn")
            .arg("-codec:a").arg("libmp3lame")
            .arg("-qscale:a").arg("2")
            .arg("-y")
            .arg("-loglevel").arg("error")
            .arg(&partial_path);

        let output = run_with_cancel(command, "ffmpeg", cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no space left") {
                return Err(StageError::ResourceExhausted(format!(
                    "ffmpeg: {}",
                    stderr.trim()
                )));
            }
            if stderr.to_lowercase().contains("invalid data") {
                return Err(StageError::InvalidInput(format!(
                    "unreadable media container: {}",
                    stderr.trim()
                )));
            }
            return Err(StageError::ToolFailed(format!(
                "ffmpeg conversion failed: {}",
                stderr.trim()
            )));
        }

        std::fs::rename(&partial_path, &target_path)
            .map_err(|e| StageError::ToolFailed(format!("cannot move extracted audio: {e}")))?;

        debug!("Extracted audio to {:?}", target_path);
        Ok(target_path)
    }
}

/// Queries the duration of an audio file using ffprobe with JSON output.
pub async fn probe_duration(path: &Path, cancel: &CancellationToken) -> StageResult<f64> {
    let mut command = tokio::process::Command::new("ffprobe");
    command
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path);

    let output = run_with_cancel(command, "ffprobe", cancel).await?;

    if !output.status.success() {
        return Err(StageError::ToolFailed("ffprobe returned error".to_string()));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|_| StageError::ToolFailed("Invalid ffprobe output".to_string()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| StageError::ToolFailed("Could not determine audio duration".to_string()))
}

/// Segments a long audio file into smaller chunks for transcription.
///
/// Each chunk will be approximately `chunk_seconds` long. Returns tuples of
/// (chunk_path, offset_seconds) for each segment.
#[instrument(skip_all)]
pub async fn split_audio(
    source: &Path,
    output_dir: &Path,
    chunk_seconds: u32,
    cancel: &CancellationToken,
) -> StageResult<Vec<(PathBuf, f64)>> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| StageError::ToolFailed(format!("cannot create {output_dir:?}: {e}")))?;

    let total_duration = probe_duration(source, cancel).await?;
    info!("Total audio duration: {:.1}s", total_duration);

    let chunk_len = chunk_seconds as f64;

    // Short audio doesn't need splitting
    if total_duration <= chunk_len {
        return Ok(vec![(source.to_path_buf(), 0.0)]);
    }

    let base_name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");

    let mut segments = Vec::new();
    let mut offset = 0.0;
    let mut idx = 0u32;

    while offset < total_duration {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let segment_path = output_dir.join(format!("{}_{:04}.mp3", base_name, idx));
        let segment_len = chunk_len.min(total_duration - offset);

        extract_chunk(source, &segment_path, offset, segment_len, cancel).await?;

        debug!("Created chunk {} at offset {:.1}s", idx, offset);
        segments.push((segment_path, offset));

        offset += chunk_len;
        idx += 1;
    }

    info!("Created {} audio chunks", segments.len());
    Ok(segments)
}

/// Extracts a time span from an audio file.
async fn extract_chunk(
    source: &Path,
    dest: &Path,
    start: f64,
    length: f64,
    cancel: &CancellationToken,
) -> StageResult<()> {
    // First attempt: stream copy (fast, no quality loss)
    let mut copy_command = tokio::process::Command::new("ffmpeg");
    copy_command
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest);

    if let Ok(output) = run_with_cancel(copy_command, "ffmpeg", cancel).await {
        if output.status.success() && dest.exists() {
            return Ok(());
        }
    } else if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }

    // Fallback: re-encode to MP3
    debug!("Stream copy failed, re-encoding chunk");

    let mut encode_command = tokio::process::Command::new("ffmpeg");
    encode_command
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest);

    let output = run_with_cancel(encode_command, "ffmpeg", cancel).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StageError::ToolFailed(format!(
            "chunk extraction failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let extractor = FfmpegAudioExtractor::new();
        let tmp = tempfile::tempdir().unwrap();
        let media = tmp.path().join("input.media");
        std::fs::write(&media, b"not real media").unwrap();

        let result = extractor.extract(&media, tmp.path(), &cancel).await;
        // ToolNotFound is acceptable on hosts without ffmpeg installed
        assert!(matches!(
            result,
            Err(StageError::Cancelled) | Err(StageError::ToolNotFound(_))
        ));
    }
}
