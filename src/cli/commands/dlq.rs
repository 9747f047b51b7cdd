//! Dead-letter queue commands.

use crate::cli::{DlqAction, Output};
use crate::config::Settings;
use crate::dead_letter;
use crate::storage::{DeadLetterStore, SqliteStore};
use anyhow::Result;
use uuid::Uuid;

/// Run a dlq subcommand.
pub async fn run_dlq(action: &DlqAction, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.sqlite_path())?;

    match action {
        DlqAction::List => {
            let entries = store.list().await?;
            if entries.is_empty() {
                Output::info("Dead-letter queue is empty.");
                return Ok(());
            }

            Output::header(&format!("Dead-letter entries ({})", entries.len()));
            for entry in &entries {
                let requeued = if entry.requeued { " (requeued)" } else { "" };
                Output::list_item(&format!(
                    "{} video={} reason={} failed_at={}{}",
                    entry.id,
                    entry.payload.video_id.as_deref().unwrap_or("-"),
                    entry.failure_reason,
                    entry.failed_at.to_rfc3339(),
                    requeued,
                ));
                Output::kv("    error", &entry.details.message);
            }
        }

        DlqAction::Stats => {
            let stats = store.failure_reason_statistics().await?;
            let total: u64 = stats.values().sum();

            Output::header("Dead-letter statistics");
            for (reason, count) in &stats {
                Output::kv(reason.as_str(), &count.to_string());
            }
            Output::kv("total", &total.to_string());
        }

        DlqAction::Requeue { id } => {
            let entry_id = Uuid::parse_str(id)
                .map_err(|_| anyhow::anyhow!("'{id}' is not a valid entry ID"))?;

            match dead_letter::requeue(
                &store,
                &store,
                entry_id,
                "cli",
                settings.pipeline.max_retries,
            )
            .await?
            {
                Some(job) => {
                    Output::success(&format!(
                        "Requeued {} as new job {}; run 'tolk status {}' to watch it",
                        entry_id, job.id, job.id
                    ));
                }
                None => {
                    Output::warning(&format!(
                        "Entry {} does not exist or was already requeued",
                        entry_id
                    ));
                }
            }
        }
    }

    Ok(())
}
