//! rbit-epub command line
//!
//! Runs a single build locally, submits build requests to the worker queue,
//! or prints the status history of a queued job.

use clap::{Parser, Subcommand};
use rbit_epub::config::{AppConfig, BuildSettings};
use rbit_epub::models::job::JobOutcome;
use rbit_epub::models::request::BuildRequest;
use rbit_epub::runner::BuildJobRunner;
use rbit_epub::services::fetcher::HttpArchiveFetcher;
use rbit_epub::services::queue::{JobQueue, QueuedJob};
use rbit_epub::services::status::{status_history, LogStatusSink};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rbit-epub")]
#[command(about = "Build EPUB files from collections with oer.exports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build here, reading settings from the environment
    Build {
        /// File holding the JSON build request
        message: PathBuf,

        /// Create working directories under this directory
        #[arg(long)]
        work_root: Option<PathBuf>,
    },

    /// Put a build request on the worker queue
    Submit {
        /// File holding the JSON build request
        message: PathBuf,
    },

    /// Print the recorded status history of a queued job
    Status {
        /// Job id printed by `submit`
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { message, work_root } => {
            let settings = BuildSettings::from_env()?;
            let message = tokio::fs::read_to_string(&message).await?;

            let fetcher = HttpArchiveFetcher::new(settings.fetch_timeout)?;
            let mut runner = BuildJobRunner::new(settings, fetcher);
            if let Some(root) = work_root {
                runner = runner.with_workspace_root(root);
            }

            match runner.run(&message, &LogStatusSink::new()).await? {
                JobOutcome::Completed { artifact } => println!("{}", artifact.display()),
                JobOutcome::Failed { reason, workspace } => {
                    if let Some(dir) = workspace {
                        eprintln!("working directory kept at {}", dir.display());
                    }
                    return Err(String::from_utf8_lossy(&reason).into_owned().into());
                }
            }
        }
        Commands::Submit { message } => {
            let config = AppConfig::from_env()?;
            let message = tokio::fs::read_to_string(&message).await?;

            // Reject requests a worker could never decode
            BuildRequest::decode(&message)?;

            let queue = JobQueue::new(&config.redis_url)?;
            let job = QueuedJob::new(message);
            queue.enqueue(&job).await?;
            tracing::info!(job_id = %job.job_id, "Build request queued");
            println!("{}", job.job_id);
        }
        Commands::Status { job_id } => {
            let config = AppConfig::from_env()?;
            let client = redis::Client::open(config.redis_url.as_str())?;
            for update in status_history(&client, job_id).await? {
                println!(
                    "{}\t{}\t{}",
                    update.at.to_rfc3339(),
                    update.phase,
                    update.message_text()
                );
            }
        }
    }

    Ok(())
}
