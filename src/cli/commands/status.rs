//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::job::{Job, PipelineStage};
use crate::storage::{JobStore, SqliteStore};
use anyhow::Result;
use uuid::Uuid;

/// Run the status command.
pub async fn run_status(job_id: Option<&str>, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.sqlite_path())?;

    match job_id {
        Some(raw) => {
            let id = Uuid::parse_str(raw)
                .map_err(|_| anyhow::anyhow!("'{raw}' is not a valid job ID"))?;

            match JobStore::get(&store, id).await? {
                Some(job) => print_job(&job),
                None => Output::warning(&format!("No job with ID {}", id)),
            }
        }
        None => {
            let jobs = store.list_recent(10).await?;
            if jobs.is_empty() {
                Output::info("No jobs yet. Use 'tolk process <input>' to start one.");
                return Ok(());
            }

            Output::header(&format!("Recent jobs ({})", jobs.len()));
            for job in &jobs {
                Output::list_item(&format!(
                    "{} {} [{}] {}%{}",
                    job.id,
                    job.video_id.as_deref().unwrap_or("-"),
                    job.status,
                    job.overall_progress,
                    job.last_error_message
                        .as_deref()
                        .map(|e| format!(" - {e}"))
                        .unwrap_or_default(),
                ));
            }
        }
    }

    Ok(())
}

fn print_job(job: &Job) {
    Output::header(&format!("Job {}", job.id));
    Output::kv("Status", &job.status.to_string());
    Output::kv("Video", job.video_id.as_deref().unwrap_or("-"));
    Output::kv("User", &job.user_id);
    Output::kv("Overall progress", &format!("{}%", job.overall_progress));

    if let Some(stage) = job.current_stage {
        Output::kv("Current stage", stage.as_str());
    }

    for stage in PipelineStage::WEIGHTED {
        if let Some(value) = job.stage_progress.get(stage) {
            Output::kv(&format!("  {}", stage), &format!("{value:.0}%"));
        }
    }

    Output::kv(
        "Retries",
        &format!("{}/{}", job.retry_count, job.max_retries),
    );
    if let Some(next) = job.next_retry_at {
        Output::kv("Next retry at", &next.to_rfc3339());
    }
    if let Some(stage) = job.failed_stage {
        Output::kv("Failed stage", stage.as_str());
    }
    if let Some(message) = &job.last_error_message {
        Output::kv("Last error", message);
    }
    if let Some(category) = job.last_failure_category {
        Output::kv("Failure category", category.as_str());
    }
    Output::kv("Created", &job.created_at.to_rfc3339());
    if let Some(completed) = job.completed_at {
        Output::kv("Completed", &completed.to_rfc3339());
    }
    if let Some(failed) = job.failed_at {
        Output::kv("Failed", &failed.to_rfc3339());
    }
}
