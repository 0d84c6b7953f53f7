//! # Background Jobs and Progress
//!
//! Extraction and CDC phases run as background jobs, one per requested
//! operation. Each job has:
//!
//! - a pollable [`JobStatusRecord`] in the [`JobRegistry`]
//! - a broadcast channel of [`ProgressEvent`]s, one per processed page
//!
//! [`run_job`] is the top-level catch-all: an error marks the job ERROR,
//! publishes an error event, is logged, and is then returned to the caller
//! so the failure stays visible.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = Arc::new(JobRegistry::new());
//! let reporter = registry.register("load-42");
//! let mut events = registry.subscribe("load-42").unwrap();
//!
//! let handle = spawn_job(registry.clone(), reporter.clone(), async move {
//!     loader.run(Some(&reporter)).await
//! });
//! ```

use crate::error::{CdcError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Error code reported when a failure carries no database code
pub const DEFAULT_ERROR_CODE: &str = "1050";

/// Capacity of a job's progress channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, not started
    #[default]
    Idle,
    /// Running
    Processing,
    /// Failed
    Error,
    /// Finished successfully
    Done,
}

/// Pollable status of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    /// Current status
    pub status: JobStatus,
    /// Error code when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error text when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl JobStatusRecord {
    fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            error_code: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }
}

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventKind {
    /// Job started
    Start,
    /// A page was processed
    Processing,
    /// Job failed
    Error,
    /// Job finished
    Finish,
}

/// Progress notification for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-100
    pub percent: u8,
    /// Job id
    pub job_id: String,
    /// Event kind
    pub event: ProgressEventKind,
    /// Optional text (error message on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `round(loaded / total * 100)` clamped to 100; 0 when the total is unknown
pub fn percent(loaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let p = (loaded as f64 / total as f64 * 100.0).round();
            p.min(100.0) as u8
        }
        _ => 0,
    }
}

struct ReporterInner {
    job_id: String,
    sender: broadcast::Sender<ProgressEvent>,
    total: AtomicU64,
    last_percent: AtomicU8,
}

/// Publishes progress events for one job.
///
/// Reported percentages never decrease, even when the row estimate was too
/// low.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.inner.job_id)
            .field("total", &self.inner.total.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProgressReporter {
    /// Reporter with its own channel
    pub fn new(job_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self::with_sender(job_id, sender)
    }

    fn with_sender(job_id: impl Into<String>, sender: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                job_id: job_id.into(),
                sender,
                total: AtomicU64::new(0),
                last_percent: AtomicU8::new(0),
            }),
        }
    }

    /// Job id
    pub fn job_id(&self) -> &str {
        &self.inner.job_id
    }

    /// Subscribe to this job's events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.sender.subscribe()
    }

    /// Set the expected number of rows; 0 means unknown
    pub fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
    }

    /// Expected number of rows, `None` while unknown
    pub fn total(&self) -> Option<u64> {
        match self.inner.total.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    fn publish(&self, percent: u8, event: ProgressEventKind, message: Option<String>) {
        // no subscribers is fine
        let _ = self.inner.sender.send(ProgressEvent {
            percent,
            job_id: self.inner.job_id.clone(),
            event,
            message,
        });
    }

    /// Job started
    pub fn start(&self) {
        self.inner.last_percent.store(0, Ordering::Relaxed);
        self.publish(0, ProgressEventKind::Start, None);
    }

    /// `loaded` rows processed so far
    pub fn processing(&self, loaded: u64) {
        let computed = percent(loaded, self.total());
        let previous = self.inner.last_percent.fetch_max(computed, Ordering::Relaxed);
        self.publish(previous.max(computed), ProgressEventKind::Processing, None);
    }

    /// Job failed
    pub fn error(&self, message: impl Into<String>) {
        let last = self.inner.last_percent.load(Ordering::Relaxed);
        self.publish(last, ProgressEventKind::Error, Some(message.into()));
    }

    /// Job finished
    pub fn finish(&self) {
        self.inner.last_percent.store(100, Ordering::Relaxed);
        self.publish(100, ProgressEventKind::Finish, None);
    }
}

/// Status and progress channels of all jobs in the process
#[derive(Default)]
pub struct JobRegistry {
    statuses: RwLock<HashMap<String, JobStatusRecord>>,
    reporters: RwLock<HashMap<String, ProgressReporter>>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in IDLE state and return its reporter.
    ///
    /// Registering an existing id resets its status and keeps its channel.
    pub fn register(&self, job_id: impl Into<String>) -> ProgressReporter {
        let job_id = job_id.into();
        let reporter = self
            .reporters
            .write()
            .entry(job_id.clone())
            .or_insert_with(|| ProgressReporter::new(job_id.clone()))
            .clone();
        self.statuses
            .write()
            .insert(job_id, JobStatusRecord::with_status(JobStatus::Idle));
        reporter
    }

    /// Subscribe to a registered job's progress
    pub fn subscribe(&self, job_id: &str) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.reporters.read().get(job_id).map(ProgressReporter::subscribe)
    }

    /// Current status of a job
    pub fn status(&self, job_id: &str) -> Option<JobStatusRecord> {
        self.statuses.read().get(job_id).cloned()
    }

    /// Set a job's status, clearing any error
    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        self.statuses
            .write()
            .insert(job_id.to_string(), JobStatusRecord::with_status(status));
    }

    /// Mark a job failed
    pub fn set_error(&self, job_id: &str, code: impl Into<String>, message: impl Into<String>) {
        let mut record = JobStatusRecord::with_status(JobStatus::Error);
        record.error_code = Some(code.into());
        record.error_message = Some(message.into());
        self.statuses.write().insert(job_id.to_string(), record);
    }

    /// Forget a job
    pub fn remove(&self, job_id: &str) {
        self.statuses.write().remove(job_id);
        self.reporters.write().remove(job_id);
    }
}

/// Run `job` with status tracking and start/finish/error events
pub async fn run_job<T, F>(registry: &JobRegistry, reporter: &ProgressReporter, job: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let job_id = reporter.job_id().to_string();
    registry.set_status(&job_id, JobStatus::Processing);
    reporter.start();
    info!(job_id = %job_id, "Job started");

    match job.await {
        Ok(value) => {
            registry.set_status(&job_id, JobStatus::Done);
            reporter.finish();
            info!(job_id = %job_id, "Job finished");
            Ok(value)
        }
        Err(err) => {
            let code = err.database_code().unwrap_or(DEFAULT_ERROR_CODE).to_string();
            let message = err.to_string();
            error!(
                job_id = %job_id,
                error_code = %code,
                category = ?err.category(),
                "Job failed: {}",
                message
            );
            registry.set_error(&job_id, code, message.clone());
            reporter.error(message);
            Err(err)
        }
    }
}

/// Spawn `job` on the runtime under [`run_job`]
pub fn spawn_job<T, F>(
    registry: Arc<JobRegistry>,
    reporter: ProgressReporter,
    job: F,
) -> JoinHandle<Result<T>>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(async move { run_job(&registry, &reporter, job).await })
}

/// Flatten a spawned job's join result
pub async fn join_job<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|e| CdcError::job(format!("job task aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, Some(200)), 0);
        assert_eq!(percent(1, Some(3)), 33);
        assert_eq!(percent(2, Some(3)), 67);
        assert_eq!(percent(500, Some(100)), 100);
        assert_eq!(percent(10, None), 0);
        assert_eq!(percent(10, Some(0)), 0);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let reporter = ProgressReporter::new("j");
        let mut rx = reporter.subscribe();
        reporter.set_total(100);
        reporter.processing(60);
        reporter.set_total(1000);
        reporter.processing(70);

        assert_eq!(rx.recv().await.unwrap().percent, 60);
        assert_eq!(rx.recv().await.unwrap().percent, 60);
    }

    #[test]
    fn test_register_resets_status() {
        let registry = JobRegistry::new();
        registry.register("j");
        registry.set_error("j", "40P01", "deadlock");
        assert_eq!(registry.status("j").unwrap().status, JobStatus::Error);

        registry.register("j");
        let status = registry.status("j").unwrap();
        assert_eq!(status.status, JobStatus::Idle);
        assert!(status.error_code.is_none());
        assert!(registry.subscribe("missing").is_none());
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent {
            percent: 40,
            job_id: "j".into(),
            event: ProgressEventKind::Processing,
            message: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "processing");
        assert!(json.get("message").is_none());
    }
}
