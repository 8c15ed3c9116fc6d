use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::job::{BuildPhase, StatusUpdate};

const STATUS_KEY_PREFIX: &str = "rbit:epub:status";
const CURRENT_KEY_PREFIX: &str = "rbit:epub:current";
const STATUS_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Receives the phase/message pairs a build job reports.
///
/// Messages are bytes so a `Failed` message can carry the conversion tool's
/// stderr unchanged.
pub trait StatusSink: Send + Sync {
    fn set_status(
        &self,
        phase: BuildPhase,
        message: &[u8],
    ) -> impl Future<Output = Result<(), StatusError>> + Send;

    /// Whether a `Done` or `Failed` status has already been recorded.
    fn terminal_recorded(&self) -> impl Future<Output = Result<bool, StatusError>> + Send;
}

/// Reports the status of one job to a sink.
///
/// `done` and `failed` consume the reporter, so a job can emit at most one
/// terminal status and nothing after it.
pub struct StatusReporter<'a, S: StatusSink> {
    sink: &'a S,
}

impl<'a, S: StatusSink> StatusReporter<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    pub async fn building(&self, message: &str) -> Result<(), StatusError> {
        self.sink.set_status(BuildPhase::Building, message.as_bytes()).await
    }

    pub async fn done(self) -> Result<(), StatusError> {
        self.sink.set_status(BuildPhase::Done, b"").await
    }

    pub async fn failed(self, message: &[u8]) -> Result<(), StatusError> {
        self.sink.set_status(BuildPhase::Failed, message).await
    }
}

/// Keeps every update in memory.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn phases(&self) -> Vec<BuildPhase> {
        self.updates().into_iter().map(|u| u.phase).collect()
    }

    pub fn last(&self) -> Option<StatusUpdate> {
        self.updates().pop()
    }

    pub fn has_terminal(&self) -> bool {
        self.updates().iter().any(|u| u.phase.is_terminal())
    }
}

impl StatusSink for RecordingStatusSink {
    async fn set_status(&self, phase: BuildPhase, message: &[u8]) -> Result<(), StatusError> {
        let mut updates = self
            .updates
            .lock()
            .map_err(|_| StatusError::Unavailable("status history lock poisoned".to_string()))?;
        updates.push(StatusUpdate::new(phase, message));
        Ok(())
    }

    async fn terminal_recorded(&self) -> Result<bool, StatusError> {
        Ok(self.has_terminal())
    }
}

/// Mirrors status updates into the log, for one-off builds run by hand.
#[derive(Debug, Default)]
pub struct LogStatusSink {
    terminal: AtomicBool,
}

impl LogStatusSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSink for LogStatusSink {
    async fn set_status(&self, phase: BuildPhase, message: &[u8]) -> Result<(), StatusError> {
        let detail = String::from_utf8_lossy(message);
        match phase {
            BuildPhase::Failed => tracing::error!(phase = %phase, detail = %detail, "Build status"),
            _ => tracing::info!(phase = %phase, detail = %detail, "Build status"),
        }
        if phase.is_terminal() {
            self.terminal.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn terminal_recorded(&self) -> Result<bool, StatusError> {
        Ok(self.terminal.load(Ordering::Relaxed))
    }
}

/// Status history of one job stored in Redis.
///
/// Every update is appended as JSON to `rbit:epub:status:<job_id>`; the
/// latest phase and message are mirrored into the hash
/// `rbit:epub:current:<job_id>`.
pub struct RedisStatusSink {
    client: redis::Client,
    job_id: Uuid,
}

impl RedisStatusSink {
    pub fn new(client: redis::Client, job_id: Uuid) -> Self {
        Self { client, job_id }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl StatusSink for RedisStatusSink {
    async fn set_status(&self, phase: BuildPhase, message: &[u8]) -> Result<(), StatusError> {
        let update = StatusUpdate::new(phase, message);
        let payload = serde_json::to_string(&update)?;
        let history_key = status_key(self.job_id);
        let latest_key = current_key(self.job_id);
        let phase_name = phase.to_string();

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::pipe()
            .atomic()
            .rpush(&history_key, &payload)
            .ignore()
            .hset_multiple(&latest_key, &[("phase", phase_name.as_bytes()), ("message", message)])
            .ignore()
            .expire(&history_key, STATUS_TTL_SECS)
            .ignore()
            .expire(&latest_key, STATUS_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn terminal_recorded(&self) -> Result<bool, StatusError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let phase: Option<String> = conn.hget(current_key(self.job_id), "phase").await?;
        Ok(phase
            .and_then(|p| p.parse::<BuildPhase>().ok())
            .is_some_and(BuildPhase::is_terminal))
    }
}

/// Read back the stored status history of a job, oldest first.
pub async fn status_history(
    client: &redis::Client,
    job_id: Uuid,
) -> Result<Vec<StatusUpdate>, StatusError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let entries: Vec<String> = conn.lrange(status_key(job_id), 0, -1).await?;
    entries
        .iter()
        .map(|e| serde_json::from_str(e).map_err(StatusError::Serialize))
        .collect()
}

fn status_key(job_id: Uuid) -> String {
    format!("{STATUS_KEY_PREFIX}:{job_id}")
}

fn current_key(job_id: Uuid) -> String {
    format!("{CURRENT_KEY_PREFIX}:{job_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Status sink unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_sequence() {
        let sink = RecordingStatusSink::new();
        let reporter = StatusReporter::new(&sink);
        reporter.building("Starting job").await.unwrap();
        reporter.building("Running").await.unwrap();
        reporter.done().await.unwrap();

        assert_eq!(
            sink.phases(),
            vec![BuildPhase::Building, BuildPhase::Building, BuildPhase::Done]
        );
        assert!(sink.last().unwrap().message.is_empty());
        assert!(sink.has_terminal());
    }

    #[tokio::test]
    async fn test_failed_carries_message() {
        let sink = RecordingStatusSink::new();
        StatusReporter::new(&sink)
            .failed(b"bad byte \xff in module")
            .await
            .unwrap();

        let last = sink.last().unwrap();
        assert_eq!(last.phase, BuildPhase::Failed);
        assert_eq!(last.message, b"bad byte \xff in module");
        assert!(sink.terminal_recorded().await.unwrap());
    }

    #[tokio::test]
    async fn test_log_sink_tracks_terminal() {
        let sink = LogStatusSink::new();
        tokio_test::assert_ok!(sink.set_status(BuildPhase::Building, b"hello").await);
        assert!(!sink.terminal_recorded().await.unwrap());

        tokio_test::assert_ok!(sink.set_status(BuildPhase::Done, b"").await);
        assert!(sink.terminal_recorded().await.unwrap());
    }

    #[test]
    fn test_keys() {
        let id = Uuid::nil();
        assert_eq!(
            status_key(id),
            "rbit:epub:status:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            current_key(id),
            "rbit:epub:current:00000000-0000-0000-0000-000000000000"
        );
    }
}
