use std::sync::Arc;
use uuid::Uuid;

use crate::runner::BuildJobRunner;
use crate::services::{fetcher::HttpArchiveFetcher, queue::JobQueue, status::RedisStatusSink};

/// Shared state of the worker process.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub runner: Arc<BuildJobRunner<HttpArchiveFetcher>>,
}

impl AppState {
    pub fn new(queue: JobQueue, runner: BuildJobRunner<HttpArchiveFetcher>) -> Self {
        Self {
            queue: Arc::new(queue),
            runner: Arc::new(runner),
        }
    }

    /// Status sink recording the history of `job_id` next to the queue.
    pub fn status_sink(&self, job_id: Uuid) -> RedisStatusSink {
        RedisStatusSink::new(self.queue.client().clone(), job_id)
    }
}
