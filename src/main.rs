use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipscribe::batch::{BatchItem, BatchItemStatus, BatchScheduler, ClipStudio};
use clipscribe::cli::{Cli, Commands};
use clipscribe::config::Config;
use clipscribe::job::{JobOrchestrator, JobSnapshot};
use clipscribe::notify::ConsoleSink;
use clipscribe::progress::JobStage;
use clipscribe::service::{GenerationOptions, HttpProcessingClient};
use clipscribe::storage::LocalMediaStorage;
use clipscribe::store::{InMemoryStore, JobStatus};
use clipscribe::utils::format_duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "clipscribe=debug"
    } else {
        "clipscribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Process {
            file,
            summary,
            key_points,
            action_items,
            timestamps,
        } => {
            let options = if summary || key_points || action_items || timestamps {
                GenerationOptions {
                    generate_summary: summary,
                    generate_key_points: key_points,
                    generate_action_items: action_items,
                    generate_timestamps: timestamps,
                }
            } else {
                config.app.default_options
            };

            let orchestrator = Arc::new(JobOrchestrator::new(
                Arc::new(LocalMediaStorage::new(config.app.media_dir.clone())?),
                Arc::new(InMemoryStore::new()),
                Arc::new(HttpProcessingClient::new(
                    config.endpoint()?,
                    config.service.api_key.clone(),
                )),
                Arc::new(ConsoleSink::new()),
                config.app.owner_id.clone(),
            ));

            // Ctrl-C turns into a clean cancel of the in-flight job.
            let canceller = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });

            let bar = if cli.quiet {
                None
            } else {
                Some(spawn_progress_bar(orchestrator.subscribe()))
            };

            tracing::info!("Starting processing for file: {}", file.display());
            let outcome = orchestrator.start(&file, options).await?;

            if let Some(bar) = bar {
                bar.await.ok();
            }

            if outcome.status == JobStatus::Completed {
                if !outcome.content.transcript.is_empty() {
                    println!("\nTranscript:\n{}", outcome.content.transcript);
                }
                for (kind, value) in &outcome.content.content {
                    let rendered = match value.as_str() {
                        Some(text) => text.to_string(),
                        None => serde_json::to_string_pretty(value)?,
                    };
                    println!("\n{}:\n{}", kind.as_str(), rendered);
                }
            } else if let Some(error) = &outcome.error {
                tracing::warn!(status = ?outcome.status, error, "job did not complete");
            }
        }
        Commands::Batch { files, clips } => {
            let scheduler = BatchScheduler::new(
                Arc::new(ClipStudio::new()),
                Arc::new(ConsoleSink::new()),
                clips.unwrap_or(config.app.clip_count),
            );

            let items = files.iter().map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                // The file stem stands in as the transcript proxy for analysis.
                let proxy = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                BatchItem::new(name, proxy)
            });
            scheduler.enqueue(items)?;

            scheduler.start().await?;

            for item in scheduler.items() {
                match item.status {
                    BatchItemStatus::Completed => {
                        println!("{} ({} clips)", item.file_name, item.clips.len());
                        for clip in &item.clips {
                            println!(
                                "  {} [{}] {} (score {:.1})",
                                clip.title,
                                format_duration(clip.duration_secs),
                                clip.hook,
                                clip.engagement_score
                            );
                        }
                    }
                    _ => println!(
                        "{}: {:?}{}",
                        item.file_name,
                        item.status,
                        item.error
                            .as_deref()
                            .map(|e| format!(": {}", e))
                            .unwrap_or_default()
                    ),
                }
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.display();
                println!("\nEdit the config file to change these values.");
            }
        }
    }

    Ok(())
}

/// Drive an indicatif bar from the orchestrator's snapshot channel.
fn spawn_progress_bar(mut snapshots: watch::Receiver<JobSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap(),
        );

        loop {
            let (stage, progress) = {
                let snapshot = snapshots.borrow();
                (snapshot.stage, snapshot.progress)
            };
            bar.set_position(progress as u64);
            bar.set_message(stage.as_str());

            if matches!(stage, JobStage::Complete | JobStage::Error) {
                break;
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }

        bar.finish_and_clear();
    })
}
