//! YouTube media download via yt-dlp.

use super::{run_with_cancel, MediaDownloader, ProgressSink, StageResult, VideoMetadata};
use crate::error::StageError;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Extract a video ID from a YouTube URL or bare 11-character ID.
pub fn extract_video_id(input: &str) -> Option<String> {
    // Matches various YouTube URL formats and bare video IDs
    let video_id_regex = Regex::new(
        r"(?x)
        (?:
            (?:https?://)?
            (?:www\.)?
            (?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/)
            ([a-zA-Z0-9_-]{11})
        )
        |
        ^([a-zA-Z0-9_-]{11})$
    ",
    )
    .expect("Invalid regex");

    let caps = video_id_regex.captures(input.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// yt-dlp-based media downloader.
pub struct YtDlpDownloader {
    progress_regex: Regex,
}

impl YtDlpDownloader {
    pub fn new() -> Self {
        // yt-dlp --newline progress lines: "[download]  42.3% of 10.0MiB ..."
        let progress_regex =
            Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("Invalid regex");
        Self { progress_regex }
    }

    fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    /// Map a failed yt-dlp run to a typed stage error.
    ///
    /// This is the boundary where the tool's text output becomes a tagged
    /// error; everything downstream looks only at the variant.
    fn classify_failure(video_id: &str, stderr: &str) -> StageError {
        let msg = stderr.to_lowercase();

        if msg.contains("video unavailable")
            || msg.contains("video is unavailable")
            || msg.contains("has been removed")
            || msg.contains("does not exist")
        {
            return StageError::NotFound(format!("video {video_id}: {}", first_line(stderr)));
        }

        if msg.contains("private video")
            || msg.contains("sign in")
            || (msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")))
            || msg.contains("not available in your country")
            || msg.contains("blocked")
        {
            return StageError::AccessDenied(format!("video {video_id}: {}", first_line(stderr)));
        }

        if msg.contains("unsupported url") || msg.contains("is not a valid url") {
            return StageError::InvalidInput(format!("{video_id}: {}", first_line(stderr)));
        }

        if msg.contains("no space left") {
            return StageError::ResourceExhausted(first_line(stderr).to_string());
        }

        if msg.contains("timed out")
            || msg.contains("connection")
            || msg.contains("network")
            || msg.contains("unable to download")
            || msg.contains("http error 5")
        {
            return StageError::Network(format!("video {video_id}: {}", first_line(stderr)));
        }

        StageError::ToolFailed(format!("yt-dlp: {}", first_line(stderr)))
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    /// Download the media file, parsing yt-dlp's progress lines.
    ///
    /// If the file already exists from a previous attempt, it is reused.
    #[instrument(skip(self, progress, cancel), fields(video_id = %video_id))]
    async fn download(
        &self,
        video_id: &str,
        output_dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StageResult<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| StageError::ToolFailed(format!("cannot create {output_dir:?}: {e}")))?;

        let target_path = output_dir.join(format!("{}.media", video_id));

        if target_path.exists() {
            info!("Using cached media file");
            progress.report(100.0);
            return Ok(target_path);
        }

        info!("Downloading media for {}", video_id);

        let mut command = tokio::process::Command::new("yt-dlp");
        command
            .arg("--output")
            .arg(&target_path)
            .arg("--no-playlist")
            .arg("--newline")
            .arg("--no-warnings")
            .arg(Self::watch_url(video_id))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StageError::ToolNotFound("yt-dlp".to_string())
            } else {
                StageError::ToolFailed(format!("yt-dlp: {e}"))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StageError::ToolFailed("yt-dlp stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(StageError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(caps) = self.progress_regex.captures(&line) {
                            if let Ok(pct) = caps[1].parse::<f32>() {
                                progress.report(pct);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed reading yt-dlp output: {}", e);
                        break;
                    }
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StageError::ToolFailed(format!("yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_failure(video_id, &stderr));
        }

        if !target_path.exists() {
            return Err(StageError::ToolFailed(
                "yt-dlp reported success but no media file was produced".to_string(),
            ));
        }

        progress.report(100.0);
        debug!("Downloaded media to {:?}", target_path);
        Ok(target_path)
    }

    /// Fetch metadata using yt-dlp --dump-json.
    #[instrument(skip(self), fields(video_id = %video_id))]
    async fn fetch_metadata(&self, video_id: &str) -> StageResult<VideoMetadata> {
        let mut command = tokio::process::Command::new("yt-dlp");
        command
            .args(["--dump-json", "--no-download", "--no-warnings"])
            .arg(Self::watch_url(video_id));

        let cancel = CancellationToken::new();
        let output = run_with_cancel(command, "yt-dlp", &cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_failure(video_id, &stderr));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value = serde_json::from_str(json_str.trim())
            .map_err(|e| StageError::ToolFailed(format!("yt-dlp metadata parse: {e}")))?;

        let title = json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string();
        let duration_seconds = json["duration"].as_f64().map(|d| d as u32);
        let channel = json["channel"]
            .as_str()
            .or_else(|| json["uploader"].as_str())
            .map(|s| s.to_string());

        Ok(VideoMetadata {
            id: video_id.to_string(),
            title,
            duration_seconds,
            channel,
            url: Self::watch_url(video_id),
        })
    }
}
