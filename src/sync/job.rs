//! Sync job state machine

use super::listeners::{ListenerId, ListenerSet, SyncPhase, SyncProgress};
use crate::error::{ErrorKind, IntegrationError};
use crate::integrations::{RetryConfig, RetryStrategy, ServiceAdapter, SyncOptions, SyncResult};
use crate::{metrics, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_JOB: AtomicU64 = AtomicU64::new(1);

/// Build a process-unique job id: `{service}-{resource}-{unix_millis}-{counter}`
pub fn generate_job_id(service_name: &str, resource_type: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        service_name,
        resource_type,
        Utc::now().timestamp_millis(),
        NEXT_JOB.fetch_add(1, Ordering::Relaxed)
    )
}

/// Lifecycle state of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub service_name: String,
    pub resource_type: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

struct JobState {
    status: JobStatus,
    result: Option<SyncResult>,
    error: Option<IntegrationError>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

/// One bulk sync of a resource type through an adapter
///
/// ```text
/// pending --start--> running --ok--> completed
///                    running --err--> failed
///                    running --pause--> paused --resume--> running
/// pending | paused --cancel--> failed
/// ```
///
/// Cancelling or pausing a running job is cooperative. Both flags are
/// checked before every attempt; the in-flight attempt always runs to the
/// end, and a cancel seen after it turns its outcome into a `cancelled` error.
pub struct SyncJob {
    job_id: String,
    adapter: Arc<dyn ServiceAdapter>,
    service_name: String,
    resource_type: String,
    options: SyncOptions,
    retry: RetryStrategy,
    state: Mutex<JobState>,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
    last_attempt: AtomicU32,
    progress_listeners: ListenerSet<SyncProgress>,
    complete_listeners: ListenerSet<SyncResult>,
    error_listeners: ListenerSet<IntegrationError>,
}

impl SyncJob {
    pub fn new(
        adapter: Arc<dyn ServiceAdapter>,
        resource_type: impl Into<String>,
        options: SyncOptions,
        retry: RetryConfig,
    ) -> Self {
        let service_name = adapter.service_name().to_string();
        let resource_type = resource_type.into();

        Self {
            job_id: generate_job_id(&service_name, &resource_type),
            adapter,
            service_name,
            resource_type,
            options,
            retry: RetryStrategy::new(retry),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                result: None,
                error: None,
                start_time: None,
                end_time: None,
            }),
            cancel_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            last_attempt: AtomicU32::new(0),
            progress_listeners: ListenerSet::new("progress"),
            complete_listeners: ListenerSet::new("complete"),
            error_listeners: ListenerSet::new("error"),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn result(&self) -> Option<SyncResult> {
        self.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<IntegrationError> {
        self.state.lock().error.clone()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().end_time
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> JobStatusReport {
        let state = self.state.lock();
        JobStatusReport {
            job_id: self.job_id.clone(),
            service_name: self.service_name.clone(),
            resource_type: self.resource_type.clone(),
            status: state.status,
            start_time: state.start_time,
            end_time: state.end_time,
            cancel_requested: self.is_cancel_requested(),
        }
    }

    pub fn on_progress<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        self.progress_listeners.add(Arc::new(listener))
    }

    pub fn on_complete<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncResult) + Send + Sync + 'static,
    {
        self.complete_listeners.add(Arc::new(listener))
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&IntegrationError) + Send + Sync + 'static,
    {
        self.error_listeners.add(Arc::new(listener))
    }

    /// Unregister a listener of any kind; returns whether it was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.progress_listeners.remove(id)
            || self.complete_listeners.remove(id)
            || self.error_listeners.remove(id)
    }

    /// Run the sync under the retry strategy
    ///
    /// Valid from `pending` and `paused`. On failure the error is recorded,
    /// error listeners are notified, and the error is returned. A pause
    /// request parks the job and returns a `cancelled` error saying so.
    pub async fn start(&self) -> Result<SyncResult> {
        {
            let mut state = self.state.lock();
            match state.status {
                JobStatus::Running => {
                    return Err(IntegrationError::validation(
                        &self.service_name,
                        format!("Job {} is already running", self.job_id),
                    ))
                }
                JobStatus::Completed | JobStatus::Failed => {
                    return Err(IntegrationError::validation(
                        &self.service_name,
                        format!("Job {} has already finished", self.job_id),
                    ))
                }
                JobStatus::Pending | JobStatus::Paused => {}
            }
            if self.is_cancel_requested() {
                return Err(IntegrationError::validation(
                    &self.service_name,
                    format!("Job {} was cancelled before start", self.job_id),
                ));
            }

            state.status = JobStatus::Running;
            if state.start_time.is_none() {
                state.start_time = Some(Utc::now());
            }
        }
        self.pause_requested.store(false, Ordering::SeqCst);

        info!(
            job_id = %self.job_id,
            service = %self.service_name,
            resource_type = %self.resource_type,
            full_sync = self.options.full_sync,
            "Starting sync job"
        );

        let started = std::time::Instant::now();
        let operation = format!("{}.sync_to_cache", self.service_name);
        let outcome = self
            .retry
            .execute_with_checkpoint(
                &operation,
                move || async move {
                    let outcome = self
                        .adapter
                        .sync_to_cache(&self.resource_type, &self.options)
                        .await;
                    self.after_attempt(outcome)
                },
                |attempt| self.checkpoint(attempt),
            )
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                {
                    let mut state = self.state.lock();
                    state.status = JobStatus::Completed;
                    state.result = Some(result.clone());
                    state.end_time = Some(Utc::now());
                }
                self.emit_progress(self.last_attempt.load(Ordering::SeqCst), SyncPhase::Finished);
                metrics::record_sync_job(&self.service_name, &self.resource_type, "completed", elapsed);
                info!(
                    job_id = %self.job_id,
                    processed = result.records_processed,
                    failed = result.records_failed,
                    "Sync job completed"
                );
                self.complete_listeners.notify(&self.job_id, &result);
                Ok(result)
            }
            Err(e) if self.parks(&e) => {
                self.state.lock().status = JobStatus::Paused;
                info!(job_id = %self.job_id, "Sync job paused");
                Err(e)
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.status = JobStatus::Failed;
                    state.error = Some(e.clone());
                    state.end_time = Some(Utc::now());
                }
                self.emit_progress(self.last_attempt.load(Ordering::SeqCst), SyncPhase::Finished);
                metrics::record_sync_job(&self.service_name, &self.resource_type, "failed", elapsed);
                metrics::record_error(e.kind().as_str(), &self.service_name);
                warn!(job_id = %self.job_id, error = %e, "Sync job failed");
                self.error_listeners.notify(&self.job_id, &e);
                Err(e)
            }
        }
    }

    /// Ask a running job to park at its next checkpoint
    pub fn pause(&self) -> Result<()> {
        let status = self.status();
        if status != JobStatus::Running {
            return Err(IntegrationError::validation(
                &self.service_name,
                format!("Cannot pause job {} while {}", self.job_id, status),
            ));
        }
        self.pause_requested.store(true, Ordering::SeqCst);
        debug!(job_id = %self.job_id, "Pause requested");
        Ok(())
    }

    /// Continue a paused job
    pub async fn resume(&self) -> Result<SyncResult> {
        let status = self.status();
        if status != JobStatus::Paused {
            return Err(IntegrationError::validation(
                &self.service_name,
                format!("Cannot resume job {} while {}", self.job_id, status),
            ));
        }
        info!(job_id = %self.job_id, "Resuming sync job");
        self.start().await
    }

    /// Cancel the job
    ///
    /// A pending or paused job fails immediately without touching the
    /// adapter. A running job fails at its next checkpoint.
    pub fn cancel(&self) -> Result<()> {
        let cancelled = {
            let mut state = self.state.lock();
            match state.status {
                JobStatus::Completed | JobStatus::Failed => {
                    return Err(IntegrationError::validation(
                        &self.service_name,
                        format!("Job {} has already finished", self.job_id),
                    ))
                }
                JobStatus::Running => {
                    self.cancel_requested.store(true, Ordering::SeqCst);
                    debug!(job_id = %self.job_id, "Cancellation requested");
                    None
                }
                JobStatus::Pending | JobStatus::Paused => {
                    self.cancel_requested.store(true, Ordering::SeqCst);
                    let error = self.cancellation_error();
                    state.status = JobStatus::Failed;
                    state.error = Some(error.clone());
                    state.end_time = Some(Utc::now());
                    Some(error)
                }
            }
        };

        if let Some(error) = cancelled {
            info!(job_id = %self.job_id, "Sync job cancelled");
            metrics::record_sync_job(&self.service_name, &self.resource_type, "cancelled", 0.0);
            self.error_listeners.notify(&self.job_id, &error);
        }
        Ok(())
    }

    fn checkpoint(&self, attempt: u32) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(self.cancellation_error());
        }
        if self.pause_requested.load(Ordering::SeqCst) {
            return Err(IntegrationError::cancelled(
                &self.service_name,
                format!("Job {} paused", self.job_id),
            ));
        }

        self.last_attempt.store(attempt, Ordering::SeqCst);
        let phase = if attempt == 1 {
            SyncPhase::Starting
        } else {
            SyncPhase::Retrying
        };
        self.emit_progress(attempt, phase);
        Ok(())
    }

    /// A cancel that arrived during the attempt discards its outcome
    fn after_attempt(&self, outcome: Result<SyncResult>) -> Result<SyncResult> {
        if self.is_cancel_requested() {
            return Err(self.cancellation_error());
        }
        outcome
    }

    fn parks(&self, error: &IntegrationError) -> bool {
        error.kind() == ErrorKind::Cancelled
            && self.pause_requested.load(Ordering::SeqCst)
            && !self.is_cancel_requested()
    }

    fn cancellation_error(&self) -> IntegrationError {
        IntegrationError::cancelled(
            &self.service_name,
            format!("Job {} cancelled", self.job_id),
        )
    }

    fn emit_progress(&self, attempt: u32, phase: SyncPhase) {
        let progress = SyncProgress {
            job_id: self.job_id.clone(),
            attempt,
            max_attempts: self.retry.config().max_attempts,
            phase,
        };
        self.progress_listeners.notify(&self.job_id, &progress);
    }
}

impl fmt::Debug for SyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncJob")
            .field("job_id", &self.job_id)
            .field("resource_type", &self.resource_type)
            .field("status", &self.status())
            .finish()
    }
}
