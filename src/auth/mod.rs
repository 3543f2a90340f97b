//! Credential lifecycle
//!
//! Credentials for each provider are cached in memory, persisted encrypted
//! through a [`CredentialBackend`](crate::storage::CredentialBackend), and
//! refreshed against the provider's OAuth token endpoint when they approach
//! expiry.
//!
//! # Lookup order
//!
//! 1. In-memory cache
//! 2. Static (environment) credentials
//! 3. Persistent backend, decrypted and cached on hit

mod credentials;
mod crypto;
mod oauth;
mod store;

pub use credentials::{
    expiry_after, expiry_buffer, OAuthCredentials, ServiceCredentials, EXPIRY_BUFFER_SECS,
    MAX_TOKEN_LIFETIME_SECS,
};
pub use crypto::{CipherError, CredentialCipher};
pub use oauth::{CodeExchange, HttpTokenEndpoint, RefreshExchange, TokenEndpoint, TokenResponse};
pub use store::{CredentialStore, StaticCredentials};
