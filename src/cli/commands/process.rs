//! Process command: run a video through the whole pipeline.
//!
//! The loop below is CLI-level driver code standing in for an external
//! dispatcher: it re-invokes the orchestrator after `next_retry_at` and
//! forwards Ctrl-C as cancellation. The orchestrator itself never sleeps or
//! reschedules.

use super::build_pipeline;
use crate::cli::Output;
use crate::config::Settings;
use crate::error::TolkError;
use crate::job::{Job, JobParameters, JobStatus, JobType};
use crate::orchestrator::PipelineOutcome;
use crate::services::extract_video_id;
use crate::storage::JobStore;
use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Run the process command.
pub async fn run_process(input: &str, user: &str, settings: Settings) -> Result<()> {
    let Some(video_id) = extract_video_id(input) else {
        Output::error(&format!("Could not parse a YouTube video from: {}", input));
        anyhow::bail!("invalid input");
    };

    if !crate::services::is_api_key_configured() {
        Output::warning("OPENAI_API_KEY is not set; the transcription stage will fail");
    }

    let (store, orchestrator) = build_pipeline(&settings)?;

    let job = Job::new(
        user,
        Some(video_id.clone()),
        JobType::TranscribeVideo,
        JobParameters::new(),
        settings.pipeline.max_retries,
    );
    store.insert(&job).await?;

    Output::info(&format!("Processing video {} as job {}", video_id, job.id));

    // Forward Ctrl-C as cancellation
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Live progress from the job row
    let pb = Output::percent_bar("starting");
    let poller = {
        let store = store.clone();
        let pb = pb.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            loop {
                if let Ok(Some(job)) = JobStore::get(store.as_ref(), job_id).await {
                    pb.set_position(job.overall_progress as u64);
                    if let Some(stage) = job.current_stage {
                        pb.set_message(stage.to_string());
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
        })
    };

    let result = drive_to_terminal(&orchestrator, &job, &cancel).await;

    poller.abort();
    pb.finish_and_clear();

    match result {
        Ok(PipelineOutcome::Completed) => {
            Output::success(&format!("Video {} transcribed and segmented", video_id));
            Ok(())
        }
        Ok(PipelineOutcome::Failed { stage, reason }) => {
            Output::error(&format!(
                "Job failed permanently in {} ({}); see 'tolk dlq list'",
                stage, reason
            ));
            anyhow::bail!("job failed");
        }
        Ok(outcome) => {
            Output::warning(&format!("Stopped with outcome: {:?}", outcome));
            Ok(())
        }
        Err(TolkError::Cancelled) => {
            // The invocation stopped cleanly; record the operator's decision.
            if let Ok(Some(mut job)) = JobStore::get(store.as_ref(), job.id).await {
                job.mark_cancelled();
                let _ = store.update(&job).await;
            }
            Output::warning("Cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Re-invoke the orchestrator until the job reaches a terminal state,
/// honouring the backoff it computes.
async fn drive_to_terminal(
    orchestrator: &crate::orchestrator::PipelineOrchestrator,
    job: &Job,
    cancel: &CancellationToken,
) -> std::result::Result<PipelineOutcome, TolkError> {
    loop {
        match orchestrator.execute(job.id, cancel).await? {
            PipelineOutcome::RetryScheduled {
                stage,
                next_retry_at,
            } => {
                let wait = (next_retry_at - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                Output::warning(&format!(
                    "Stage {} failed, retrying in {}s",
                    stage,
                    wait.as_secs()
                ));

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(TolkError::Cancelled),
                }
            }
            PipelineOutcome::AlreadyTerminal { status } if status == JobStatus::Completed => {
                return Ok(PipelineOutcome::Completed);
            }
            outcome => return Ok(outcome),
        }
    }
}
