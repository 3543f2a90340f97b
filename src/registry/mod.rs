//! Integration registry
//!
//! The registry is the entry point applications use. It owns the adapter
//! directory, loads and refreshes credentials through the
//! [`CredentialStore`](crate::auth::CredentialStore), schedules and tracks
//! [`SyncJob`](crate::sync::SyncJob)s, and turns webhooks into cache
//! invalidation.
//!
//! # Example
//!
//! ```ignore
//! use integration_hub::registry::IntegrationRegistry;
//!
//! let registry = Arc::new(IntegrationRegistry::new(store, RetryConfig::default()));
//! registry.register_adapter(Arc::new(RestAdapter::new(config)?));
//!
//! let mut events = registry.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let outcome = registry
//!     .schedule_sync("files", "file", SyncOptions::full())
//!     .await;
//! ```

mod directory;
mod events;

pub use directory::IntegrationRegistry;
pub use events::{IntegrationStatus, JobResult, RegistryEvent, DEFAULT_EVENT_CAPACITY};
