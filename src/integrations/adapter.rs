//! Service adapter contract
//!
//! Every provider integration implements [`ServiceAdapter`]. The registry
//! and sync jobs only ever see adapters through this trait.

use super::types::{
    AuthResult, AuthStatus, QueryOptions, Resource, ResourceQuery, ServiceCapabilities,
    SyncOptions, SyncResult,
};
use crate::auth::ServiceCredentials;
use crate::error::IntegrationError;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

/// A provider integration
///
/// Data-access methods fail with an `authentication` error when no
/// credentials are set, and with `not_found` for resource types missing from
/// [`service_capabilities`](Self::service_capabilities). Both checks happen
/// before any request is sent.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Unique name of the provider
    fn service_name(&self) -> &str;

    /// Replace the adapter's credentials; `None` clears them
    fn set_credentials(&self, credentials: Option<ServiceCredentials>);

    async fn fetch_resource(
        &self,
        resource_type: &str,
        id: &str,
        options: &QueryOptions,
    ) -> Result<Resource>;

    async fn fetch_resources(
        &self,
        resource_type: &str,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>>;

    async fn create_resource(
        &self,
        resource_type: &str,
        data: serde_json::Value,
    ) -> Result<Resource>;

    async fn update_resource(
        &self,
        resource_type: &str,
        id: &str,
        data: serde_json::Value,
    ) -> Result<Resource>;

    async fn delete_resource(&self, resource_type: &str, id: &str) -> Result<()>;

    /// Pull remote records of one type into the local cache
    async fn sync_to_cache(&self, resource_type: &str, options: &SyncOptions)
        -> Result<SyncResult>;

    /// Drop one cached record, or every record of the type when `id` is `None`
    async fn invalidate_cache(&self, resource_type: &str, id: Option<&str>) -> Result<()>;

    async fn get_cached_resource(&self, resource_type: &str, id: &str)
        -> Result<Option<Resource>>;

    async fn get_cached_resources(
        &self,
        resource_type: &str,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>>;

    /// Verify the current credentials against the provider
    async fn authenticate(&self) -> Result<AuthResult>;

    async fn refresh_authentication(&self) -> Result<AuthResult>;

    async fn check_auth_status(&self) -> AuthStatus;

    fn service_capabilities(&self) -> ServiceCapabilities;
}

/// Interior-mutable credential holder for adapters
#[derive(Debug, Default)]
pub struct CredentialSlot {
    inner: RwLock<Option<ServiceCredentials>>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, credentials: Option<ServiceCredentials>) {
        *self.inner.write() = credentials;
    }

    pub fn get(&self) -> Option<ServiceCredentials> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Current credentials, or an `authentication` error naming the service
    pub fn require(&self, service_name: &str) -> Result<ServiceCredentials> {
        self.get().ok_or_else(|| {
            IntegrationError::authentication(service_name, "Not authenticated")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_credential_slot() {
        let slot = CredentialSlot::new();
        assert!(!slot.is_set());

        let err = slot.require("files").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.service_name(), "files");

        slot.set(Some(ServiceCredentials::api_key("k")));
        assert!(slot.is_set());
        assert_eq!(slot.require("files").unwrap().kind_name(), "api_key");

        slot.set(None);
        assert!(slot.get().is_none());
    }
}
