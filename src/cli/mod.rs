use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clipscribe",
    about = "Clipscribe - Transcribe media files and generate summaries, key points, and short clips",
    version,
    long_about = "A CLI for the clipscribe processing pipeline. Uploads a media file, streams \
                  transcription and content-generation events from the processing service, and \
                  can batch-produce short social clips across many files."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process one media file through the transcription pipeline
    Process {
        /// Path to the media file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Generate a summary
        #[arg(long)]
        summary: bool,

        /// Generate key points
        #[arg(long)]
        key_points: bool,

        /// Generate action items
        #[arg(long)]
        action_items: bool,

        /// Generate timestamps
        #[arg(long)]
        timestamps: bool,
    },

    /// Generate clips for several files sequentially
    Batch {
        /// Media files to process, in order
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Clips to generate per file (config default if not given)
        #[arg(long, value_name = "COUNT")]
        clips: Option<usize>,
    },

    /// Show or edit the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
