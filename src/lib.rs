//! integration-hub - uniform adapter layer for third-party provider APIs
//!
//! integration-hub puts every external service behind one adapter contract and
//! surrounds it with the plumbing integrations always need: a classified error
//! taxonomy, retry with backoff, encrypted credential storage with OAuth
//! refresh, resource caching and cancellable background sync jobs.
//!
//! # Architecture
//!
//! - **error**: Error taxonomy ([`ErrorKind`], [`IntegrationError`])
//! - **integrations**: Adapter contract, shared types, retry, REST adapter
//! - **auth**: Credentials, encryption at rest, OAuth token exchange
//! - **storage**: Credential backends (memory, SQLite)
//! - **cache**: TTL resource cache used by adapters
//! - **sync**: Sync jobs with lifecycle control and listeners
//! - **registry**: Adapter directory, job tracking, events
//! - **config**: YAML configuration and validation
//! - **metrics**: Prometheus counters and histograms

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod sync;

// Re-exports
pub use error::{ErrorKind, IntegrationError, Result};
pub use integrations::ServiceAdapter;
pub use registry::IntegrationRegistry;
