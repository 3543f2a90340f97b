//! Integration registry

use super::events::{IntegrationStatus, JobResult, RegistryEvent, DEFAULT_EVENT_CAPACITY};
use crate::auth::{CredentialStore, ServiceCredentials};
use crate::error::IntegrationError;
use crate::integrations::{AuthResult, RetryConfig, ServiceAdapter, SyncOptions, SyncResult, WebhookEvent};
use crate::sync::{generate_job_id, JobStatus, JobStatusReport, SyncJob};
use crate::{metrics, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Service name on errors that are not about one integration
const REGISTRY: &str = "registry";

/// Directory of adapters and the sync jobs running against them
///
/// Constructed once and shared by `Arc`. There is no global instance.
pub struct IntegrationRegistry {
    adapters: DashMap<String, Arc<dyn ServiceAdapter>>,
    active_jobs: Arc<DashMap<String, Arc<SyncJob>>>,
    credentials: Arc<CredentialStore>,
    retry: RetryConfig,
    event_tx: broadcast::Sender<RegistryEvent>,
    event_capacity: usize,
}

impl IntegrationRegistry {
    pub fn new(credentials: Arc<CredentialStore>, retry: RetryConfig) -> Self {
        Self::with_event_capacity(credentials, retry, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(
        credentials: Arc<CredentialStore>,
        retry: RetryConfig,
        capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            adapters: DashMap::new(),
            active_jobs: Arc::new(DashMap::new()),
            credentials,
            retry,
            event_tx,
            event_capacity: capacity.max(1),
        }
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Register an adapter, replacing any adapter with the same name
    pub fn register_adapter(&self, adapter: Arc<dyn ServiceAdapter>) {
        let service_name = adapter.service_name().to_string();
        let previous = self.adapters.insert(service_name.clone(), adapter);

        if previous.is_some() {
            warn!(service = %service_name, "Replacing registered adapter");
            self.send_event(RegistryEvent::AdapterReplaced { service_name });
        } else {
            info!(service = %service_name, "Registered adapter");
            self.send_event(RegistryEvent::AdapterRegistered { service_name });
        }
    }

    pub fn get_adapter(&self, service_name: &str) -> Result<Arc<dyn ServiceAdapter>> {
        self.adapters
            .get(service_name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                IntegrationError::not_found(
                    service_name,
                    format!("No adapter registered for {}", service_name),
                )
            })
    }

    pub fn has_adapter(&self, service_name: &str) -> bool {
        self.adapters.contains_key(service_name)
    }

    /// Registered service names, sorted
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Load credentials onto the adapter and authenticate it
    ///
    /// OAuth credentials inside the expiry buffer are refreshed first when a
    /// refresh token is available. Every failure is reported as an
    /// `authentication` error.
    pub async fn initialize_adapter(&self, service_name: &str) -> Result<AuthResult> {
        let adapter = self.get_adapter(service_name)?;

        match self.load_credentials(service_name).await {
            Ok(credentials) => adapter.set_credentials(Some(credentials)),
            Err(e) => return Err(self.auth_failure(service_name, e)),
        }

        match adapter.authenticate().await {
            Ok(result) => {
                info!(service = service_name, "Initialized adapter");
                Ok(result)
            }
            Err(e) => Err(self.auth_failure(service_name, e)),
        }
    }

    /// Adapter with credentials loaded, initializing it if needed
    pub async fn ensure_adapter(&self, service_name: &str) -> Result<Arc<dyn ServiceAdapter>> {
        let adapter = self.get_adapter(service_name)?;
        if !adapter.check_auth_status().await.authenticated {
            self.initialize_adapter(service_name).await?;
        }
        Ok(adapter)
    }

    /// Store credentials and push them to the adapter, if one is registered
    pub async fn update_credentials(
        &self,
        service_name: &str,
        credentials: ServiceCredentials,
    ) -> Result<()> {
        self.credentials
            .store(service_name, credentials.clone())
            .await?;

        let event = RegistryEvent::credentials_updated(service_name, &credentials);
        if let Some(adapter) = self.adapters.get(service_name).map(|e| Arc::clone(e.value())) {
            adapter.set_credentials(Some(credentials));
        }

        info!(service = service_name, "Updated credentials");
        self.send_event(event);
        Ok(())
    }

    /// Delete credentials and clear them from the adapter, if one is registered
    pub async fn remove_credentials(&self, service_name: &str) -> Result<()> {
        self.credentials.delete(service_name).await?;

        if let Some(adapter) = self.adapters.get(service_name).map(|e| Arc::clone(e.value())) {
            adapter.set_credentials(None);
        }

        info!(service = service_name, "Removed credentials");
        self.send_event(RegistryEvent::CredentialsRemoved {
            service_name: service_name.to_string(),
        });
        Ok(())
    }

    /// Create, track and run a sync job
    ///
    /// Never fails: errors come back as a `failed` [`JobResult`]. The job is
    /// dropped from the active set as soon as it completes or fails.
    pub async fn schedule_sync(
        &self,
        service_name: &str,
        resource_type: &str,
        options: SyncOptions,
    ) -> JobResult {
        let adapter = match self.get_adapter(service_name) {
            Ok(adapter) => adapter,
            Err(e) => {
                let job_id = generate_job_id(service_name, resource_type);
                warn!(job_id = %job_id, error = %e, "Cannot schedule sync");
                self.send_event(RegistryEvent::JobFailed {
                    job_id: job_id.clone(),
                    error: e.clone(),
                });
                return JobResult::failed(job_id, e);
            }
        };

        let job = Arc::new(SyncJob::new(adapter, resource_type, options, self.retry.clone()));
        let job_id = job.job_id().to_string();
        self.track(&job);

        info!(job_id = %job_id, service = service_name, resource_type, "Scheduled sync");
        self.send_event(RegistryEvent::JobScheduled {
            job_id: job_id.clone(),
            service_name: service_name.to_string(),
            resource_type: resource_type.to_string(),
        });

        let outcome = job.start().await;
        self.job_result(&job, outcome)
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<JobStatusReport> {
        Ok(self.active_job(job_id)?.report())
    }

    /// Cancel an active job
    ///
    /// Pending and paused jobs fail at once; running jobs fail at their next
    /// checkpoint.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        let job = self.active_job(job_id)?;
        job.cancel()?;
        info!(job_id, "Cancelled job");
        Ok(())
    }

    pub fn pause_job(&self, job_id: &str) -> Result<()> {
        self.active_job(job_id)?.pause()
    }

    /// Resume a paused job and wait for it
    pub async fn resume_job(&self, job_id: &str) -> Result<JobResult> {
        let job = self.active_job(job_id)?;
        if job.status() != JobStatus::Paused {
            return Err(IntegrationError::validation(
                job.service_name(),
                format!("Job {} is {}, not paused", job_id, job.status()),
            ));
        }
        let outcome = job.resume().await;
        Ok(self.job_result(&job, outcome))
    }

    /// Ids of jobs that are scheduled and not yet finished, sorted
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active_jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Adapter auth status plus its declared capabilities
    pub async fn check_integration_status(&self, service_name: &str) -> Result<IntegrationStatus> {
        let adapter = self.get_adapter(service_name)?;
        let auth = adapter.check_auth_status().await;
        Ok(IntegrationStatus {
            service_name: service_name.to_string(),
            auth,
            capabilities: adapter.service_capabilities(),
        })
    }

    /// Finish an OAuth authorization-code flow
    ///
    /// Exchanges the code, stores the resulting credentials, and pushes them
    /// to the adapter if one is registered.
    pub async fn handle_oauth_callback(
        &self,
        service_name: &str,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<ServiceCredentials> {
        let credentials = self
            .credentials
            .exchange_code(service_name, code, client_id, client_secret, redirect_uri)
            .await
            .map_err(|e| self.auth_failure(service_name, e))?;

        if let Some(adapter) = self.adapters.get(service_name).map(|e| Arc::clone(e.value())) {
            adapter.set_credentials(Some(credentials.clone()));
        }

        info!(service = service_name, "Completed OAuth callback");
        self.send_event(RegistryEvent::credentials_updated(service_name, &credentials));
        Ok(credentials)
    }

    /// Invalidate the cached copy of the resource a webhook reports on
    ///
    /// Scheduling a follow-up sync is left to the caller.
    pub async fn process_webhook(&self, service_name: &str, event: &WebhookEvent) -> Result<()> {
        let adapter = self.get_adapter(service_name)?;

        debug!(
            service = service_name,
            event_type = ?event.event_type,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            "Processing webhook"
        );

        adapter
            .invalidate_cache(&event.resource_type, Some(&event.resource_id))
            .await?;

        self.send_event(RegistryEvent::WebhookProcessed {
            service_name: service_name.to_string(),
            event_type: event.event_type,
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
        });
        Ok(())
    }

    /// Credentials ready for use, refreshing OAuth tokens that are near expiry
    async fn load_credentials(&self, service_name: &str) -> Result<ServiceCredentials> {
        if self.credentials.has_valid(service_name).await {
            return self.credentials.get(service_name).await;
        }

        let current = self.credentials.get(service_name).await?;
        let refreshable = current
            .as_oauth()
            .is_some_and(|oauth| oauth.refresh_token.is_some());

        if refreshable {
            info!(service = service_name, "Refreshing credentials near expiry");
            self.credentials.refresh_oauth(service_name).await
        } else {
            Err(IntegrationError::authentication(
                service_name,
                "Credentials expired and cannot be refreshed",
            ))
        }
    }

    fn auth_failure(&self, service_name: &str, cause: IntegrationError) -> IntegrationError {
        error!(service = service_name, error = %cause, "Authentication failed");
        metrics::record_error("authentication", service_name);
        IntegrationError::authentication(service_name, cause.message().to_string())
            .with_cause(cause)
    }

    fn active_job(&self, job_id: &str) -> Result<Arc<SyncJob>> {
        self.active_jobs
            .get(job_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| IntegrationError::not_found(REGISTRY, format!("Job not found: {}", job_id)))
    }

    /// Add a job to the active set with listeners that drop it when it ends
    fn track(&self, job: &Arc<SyncJob>) {
        let job_id = job.job_id().to_string();
        self.active_jobs.insert(job_id.clone(), Arc::clone(job));
        metrics::set_active_jobs(self.active_jobs.len());

        let jobs = Arc::clone(&self.active_jobs);
        let id = job_id.clone();
        job.on_complete(move |_| {
            jobs.remove(&id);
            metrics::set_active_jobs(jobs.len());
        });

        let jobs = Arc::clone(&self.active_jobs);
        job.on_error(move |_| {
            jobs.remove(&job_id);
            metrics::set_active_jobs(jobs.len());
        });
    }

    fn job_result(&self, job: &SyncJob, outcome: Result<SyncResult>) -> JobResult {
        let job_id = job.job_id().to_string();
        match outcome {
            Ok(result) => {
                self.send_event(RegistryEvent::JobCompleted {
                    job_id: job_id.clone(),
                    records_processed: result.records_processed,
                    records_failed: result.records_failed,
                });
                JobResult::completed(job_id, result)
            }
            Err(e) if job.status() == JobStatus::Paused => JobResult {
                job_id,
                status: JobStatus::Paused,
                result: None,
                error: Some(e),
            },
            Err(e) => {
                self.send_event(RegistryEvent::JobFailed {
                    job_id: job_id.clone(),
                    error: e.clone(),
                });
                JobResult::failed(job_id, e)
            }
        }
    }

    /// Send an event, logging when the channel is close to full
    fn send_event(&self, event: RegistryEvent) {
        match self.event_tx.send(event) {
            Ok(_) => {
                let len = self.event_tx.len();
                if len > self.event_capacity * 80 / 100 {
                    warn!(
                        current = len,
                        capacity = self.event_capacity,
                        threshold_pct = 80,
                        "Event channel nearing capacity"
                    );
                }
            }
            Err(_) => debug!("Event sent but no receivers subscribed"),
        }
    }
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("services", &self.list_services())
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}
