//! Shared data types for the adapter contract

use crate::error::IntegrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default page size for bulk sync
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default record cap for bulk sync
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// A generic remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            data,
            updated_at: None,
        }
    }
}

/// Options for single-record fetches
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Skip the local cache and go to the provider
    pub bypass_cache: bool,

    /// Restrict returned fields, when the provider supports it
    pub fields: Vec<String>,

    pub include_deleted: bool,

    /// Advisory per-request timeout
    pub timeout: Option<Duration>,
}

/// Filters and paging for list fetches
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
    /// Field equality filters
    pub filters: BTreeMap<String, String>,

    /// Only records changed after this instant
    pub since: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
    pub offset: Option<usize>,

    /// Advisory per-request timeout
    pub timeout: Option<Duration>,
}

impl ResourceQuery {
    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a cached resource satisfies the filters and `since`
    pub fn matches(&self, resource: &Resource) -> bool {
        if let (Some(since), Some(updated_at)) = (self.since, resource.updated_at) {
            if updated_at <= since {
                return false;
            }
        }

        self.filters.iter().all(|(field, expected)| {
            match resource.data.get(field) {
                Some(serde_json::Value::String(s)) => s == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }
}

/// Relative urgency of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Options for one bulk sync; immutable once a job is created
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Drop the cached copy of the resource type before syncing
    pub full_sync: bool,

    /// Incremental sync starting point
    pub since_timestamp: Option<DateTime<Utc>>,

    /// Provider-side filters, passed through as query parameters
    pub filters: BTreeMap<String, String>,

    /// Records per page
    pub batch_size: usize,

    /// Stop after this many records
    pub max_records: usize,

    pub priority: Option<SyncPriority>,

    /// Advisory per-request timeout
    pub timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full_sync: false,
            since_timestamp: None,
            filters: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_records: DEFAULT_MAX_RECORDS,
            priority: None,
            timeout: None,
        }
    }
}

impl SyncOptions {
    pub fn full() -> Self {
        Self {
            full_sync: true,
            ..Default::default()
        }
    }

    pub fn since(timestamp: DateTime<Utc>) -> Self {
        Self {
            since_timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_priority(mut self, priority: SyncPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a bulk sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub successful: bool,
    pub resource_type: String,
    pub records_processed: u64,
    pub records_failed: u64,
    pub errors: Vec<IntegrationError>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub full_sync: bool,
}

impl SyncResult {
    /// A successful result with nothing processed yet
    pub fn new(resource_type: impl Into<String>, full_sync: bool) -> Self {
        Self {
            successful: true,
            resource_type: resource_type.into(),
            records_processed: 0,
            records_failed: 0,
            errors: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
            full_sync,
        }
    }

    /// Record a per-record failure
    pub fn record_failure(&mut self, error: IntegrationError) {
        self.records_failed += 1;
        self.errors.push(error);
    }
}

/// Result of an authentication attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResult {
    pub authenticated: bool,
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResult {
    pub fn success(service_name: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            authenticated: true,
            service_name: service_name.into(),
            expires_at,
            message: None,
        }
    }
}

/// Snapshot of an adapter's authentication state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn authenticated(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            authenticated: true,
            expires_at,
            error: None,
        }
    }

    pub fn unauthenticated(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            expires_at: None,
            error: Some(error.into()),
        }
    }
}

/// Operations an adapter supports for a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Fetch,
    List,
    Create,
    Update,
    Delete,
    Sync,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Fetch,
        Operation::List,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Sync,
    ];
}

/// Adapter-level features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Sync,
    Offline,
    Caching,
    Webhooks,
}

/// Provider rate limit, as declared by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
}

/// Static description of what an adapter can do
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceCapabilities {
    pub resources: Vec<String>,
    pub operations: BTreeMap<String, Vec<Operation>>,
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

impl ServiceCapabilities {
    /// Every listed resource supports every operation
    pub fn uniform(resources: &[String], features: Vec<Feature>) -> Self {
        let operations = resources
            .iter()
            .map(|r| (r.clone(), Operation::ALL.to_vec()))
            .collect();
        Self {
            resources: resources.to_vec(),
            operations,
            features,
            rate_limit: None,
        }
    }

    pub fn supports_resource(&self, resource_type: &str) -> bool {
        self.resources.iter().any(|r| r == resource_type)
    }

    pub fn supports(&self, resource_type: &str, operation: Operation) -> bool {
        self.operations
            .get(resource_type)
            .is_some_and(|ops| ops.contains(&operation))
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Reject resource types this adapter does not handle
    pub fn ensure_supported(&self, service_name: &str, resource_type: &str) -> crate::Result<()> {
        if self.supports_resource(resource_type) {
            Ok(())
        } else {
            Err(IntegrationError::not_found(
                service_name,
                format!("Unsupported resource type: {}", resource_type),
            ))
        }
    }
}

/// Kind of remote change reported by a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Create,
    Update,
    Delete,
}

/// Asynchronous change notification from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: WebhookEventType,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
