//! CLI module for Tolk.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Tolk - YouTube transcription pipeline
///
/// Runs videos through a download -> audio extraction -> transcription ->
/// segmentation pipeline and manages the resulting jobs, segments, and
/// dead-letter entries. The name "Tolk" comes from the Norwegian word for
/// "interpreter."
#[derive(Parser, Debug)]
#[command(name = "tolk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a video: create a job and drive it to a terminal state
    Process {
        /// YouTube URL or video ID
        input: String,

        /// User to attribute the job to
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Show the state of a job, or recent jobs if no ID is given
    Status {
        /// Job ID
        job_id: Option<String>,
    },

    /// Inspect and manage the dead-letter queue
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum DlqAction {
    /// List dead-letter entries
    List,

    /// Show counts per failure reason
    Stats,

    /// Requeue an entry as a brand-new job
    Requeue {
        /// Dead-letter entry ID
        id: String,
    },
}
