//! External Integrations
//!
//! The adapter contract every provider integration implements, the retry
//! strategy adapters run provider calls under, and a reference adapter for
//! JSON REST APIs.
//!
//! # Overview
//!
//! Callers never talk to a provider directly. They look an adapter up in the
//! [`IntegrationRegistry`](crate::registry::IntegrationRegistry) and use the
//! [`ServiceAdapter`] operations, or ask the registry to schedule a bulk sync.
//!
//! # Built-in Integrations
//!
//! - **REST**: [`RestAdapter`], configured per provider with [`RestServiceConfig`]
//!
//! # Sync Flow
//!
//! 1. **Preflight**: credentials present, resource type supported
//! 2. **Page**: fetch `batch_size` records at a time under the retry strategy
//! 3. **Cache**: store each record; records without an id count as failed

pub mod adapter;
pub mod rest;
pub mod retry;
pub mod types;

pub use adapter::{CredentialSlot, ServiceAdapter};
pub use rest::{RestAdapter, RestServiceConfig};
pub use retry::{RetryConfig, RetryStrategy, Retrying};
pub use types::{
    AuthResult, AuthStatus, Feature, Operation, QueryOptions, RateLimit, Resource, ResourceQuery,
    ServiceCapabilities, SyncOptions, SyncPriority, SyncResult, WebhookEvent, WebhookEventType,
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_RECORDS,
};
