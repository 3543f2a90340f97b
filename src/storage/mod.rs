//! Credential persistence
//!
//! The credential store mirrors encrypted payloads into a key-value backend
//! keyed by service name. Backends only ever see ciphertext.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::{SqliteBackend, SqliteConfig};

use crate::Result;
use async_trait::async_trait;

/// Key-value persistence for encrypted credential payloads
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Load the payload stored for `service_name`, if any
    async fn load(&self, service_name: &str) -> Result<Option<String>>;

    /// Insert or replace the payload for `service_name`
    async fn save(&self, service_name: &str, payload: &str) -> Result<()>;

    /// Remove the payload for `service_name`; removing a missing entry is not an error
    async fn remove(&self, service_name: &str) -> Result<()>;

    /// Service names with a stored payload, sorted
    async fn list(&self) -> Result<Vec<String>>;
}
