//! Registry events and result types

use crate::auth::ServiceCredentials;
use crate::error::IntegrationError;
use crate::integrations::{AuthStatus, ServiceCapabilities, SyncResult, WebhookEventType};
use crate::sync::JobStatus;
use serde::Serialize;

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// First adapter for a service
    AdapterRegistered { service_name: String },

    /// An adapter replaced an earlier one with the same name
    AdapterReplaced { service_name: String },

    CredentialsUpdated {
        service_name: String,
        kind: &'static str,
    },

    CredentialsRemoved { service_name: String },

    JobScheduled {
        job_id: String,
        service_name: String,
        resource_type: String,
    },

    JobCompleted {
        job_id: String,
        records_processed: u64,
        records_failed: u64,
    },

    JobFailed {
        job_id: String,
        error: IntegrationError,
    },

    WebhookProcessed {
        service_name: String,
        event_type: WebhookEventType,
        resource_type: String,
        resource_id: String,
    },
}

impl RegistryEvent {
    pub(crate) fn credentials_updated(service_name: &str, credentials: &ServiceCredentials) -> Self {
        RegistryEvent::CredentialsUpdated {
            service_name: service_name.to_string(),
            kind: credentials.kind_name(),
        }
    }
}

/// Outcome of a scheduled sync
///
/// `status` is `completed` or `failed`, or `paused` when a pause request
/// parked the job; paused jobs stay tracked until resumed or cancelled.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IntegrationError>,
}

impl JobResult {
    pub fn completed(job_id: impl Into<String>, result: SyncResult) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: IntegrationError) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Authentication state plus declared capabilities of one integration
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationStatus {
    pub service_name: String,
    pub auth: AuthStatus,
    pub capabilities: ServiceCapabilities,
}
