use metrics_exporter_prometheus::PrometheusBuilder;
use rbit_epub::{
    app_state::AppState,
    config::{AppConfig, BuildSettings},
    models::job::JobOutcome,
    runner::{report_build_error, BuildJobRunner, FailureReport},
    services::{fetcher::HttpArchiveFetcher, queue::JobQueue},
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting EPUB build worker");

    // Load configuration; missing build settings stop the worker here
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let settings = BuildSettings::from_env().expect("Failed to load build settings");

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();

    tracing::info!(
        python = %settings.python,
        oer_exports_dir = %settings.oer_exports_dir.display(),
        output_dir = %settings.output_dir.display(),
        "Build settings loaded"
    );

    let fetcher =
        HttpArchiveFetcher::new(settings.fetch_timeout).expect("Failed to initialize HTTP client");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    queue.health_check().await.expect("Redis is not reachable");

    let state = AppState::new(queue, BuildJobRunner::new(settings, fetcher));
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handler(Arc::clone(&shutdown));

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop; a running build always finishes before shutdown
    while !shutdown.load(Ordering::Relaxed) {
        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job");
                sleep(poll_interval).await;
            }
        }
    }

    tracing::info!("Worker stopped");
}

fn describe_metrics() {
    metrics::describe_counter!("epub_builds_total", "Build jobs taken off the queue");
    metrics::describe_counter!("epub_builds_completed", "Builds that produced an EPUB");
    metrics::describe_counter!("epub_builds_failed", "Builds whose conversion tool failed");
    metrics::describe_counter!(
        "epub_build_errors",
        "Builds aborted by an error outside the conversion tool"
    );
    metrics::describe_histogram!("epub_build_seconds", "Wall time of a build job");
    metrics::describe_gauge!("epub_queue_depth", "Build jobs waiting in the queue");
}

fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, stopping after the current job");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
    });
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let depth = state.queue.queue_depth().await?;
    metrics::gauge!("epub_queue_depth").set(depth as f64);

    let job = match state.queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(job_id = %job.job_id, "Processing build job");
    metrics::counter!("epub_builds_total").increment(1);

    let sink = state.status_sink(job.job_id);
    let start = Instant::now();

    match state.runner.run(&job.message, &sink).await {
        Ok(JobOutcome::Completed { artifact }) => {
            metrics::counter!("epub_builds_completed").increment(1);
            tracing::info!(
                job_id = %job.job_id,
                artifact = %artifact.display(),
                duration_ms = start.elapsed().as_millis(),
                "Build completed"
            );
        }
        Ok(JobOutcome::Failed { reason, workspace }) => {
            metrics::counter!("epub_builds_failed").increment(1);
            tracing::warn!(
                job_id = %job.job_id,
                reason = %String::from_utf8_lossy(&reason),
                workspace = ?workspace,
                "Build failed"
            );
        }
        Err(e) => {
            // The runner leaves reporting of its own errors to us
            metrics::counter!("epub_build_errors").increment(1);
            tracing::error!(job_id = %job.job_id, error = %e, "Build aborted");
            match report_build_error(&sink, &e).await {
                FailureReport::Recorded => {
                    tracing::debug!(job_id = %job.job_id, "Failed status recorded");
                }
                FailureReport::AlreadyTerminal => {
                    tracing::debug!(job_id = %job.job_id, "Job already has a terminal status");
                }
                FailureReport::Unrecorded(status_err) => {
                    tracing::error!(
                        job_id = %job.job_id,
                        error = %status_err,
                        "Could not record Failed status"
                    );
                }
            }
        }
    }

    // Reached for every dequeued job, so none is left in the processing list
    metrics::histogram!("epub_build_seconds").record(start.elapsed().as_secs_f64());
    state.queue.complete(&job).await?;

    Ok(true)
}
