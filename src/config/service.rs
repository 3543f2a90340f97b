//! Per-service configuration
//!
//! One entry per provider under `services:` in config.yaml.

use crate::integrations::{Feature, RestServiceConfig, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};

/// A configured provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name the adapter registers under
    pub name: String,

    /// Provider API root
    pub base_url: String,

    /// Resource types the provider exposes
    pub resources: Vec<String>,

    #[serde(default)]
    pub features: Vec<Feature>,

    /// OAuth token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    /// Environment variable holding the OAuth client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_env: Option<String>,

    /// Environment variable holding the OAuth client secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    /// Path requested to verify credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_probe_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Per-request timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, resources: Vec<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            resources,
            features: Vec::new(),
            token_url: None,
            client_id_env: None,
            client_secret_env: None,
            auth_probe_path: None,
            page_size: None,
            timeout_secs: None,
            rate_limit_per_minute: None,
        }
    }

    pub fn with_oauth(
        mut self,
        token_url: impl Into<String>,
        client_id_env: impl Into<String>,
        client_secret_env: impl Into<String>,
    ) -> Self {
        self.token_url = Some(token_url.into());
        self.client_id_env = Some(client_id_env.into());
        self.client_secret_env = Some(client_secret_env.into());
        self
    }

    /// OAuth client id from its environment variable
    pub fn client_id(&self) -> Option<String> {
        read_env(self.client_id_env.as_deref())
    }

    /// OAuth client secret from its environment variable
    pub fn client_secret(&self) -> Option<String> {
        read_env(self.client_secret_env.as_deref())
    }

    /// Settings for the REST adapter serving this service
    pub fn to_rest_config(&self) -> RestServiceConfig {
        let mut config =
            RestServiceConfig::new(self.name.clone(), self.base_url.clone(), self.resources.clone());
        if !self.features.is_empty() {
            config.features = self.features.clone();
        }
        config.auth_probe_path = self.auth_probe_path.clone();
        config.page_size = self.page_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        config.rate_limit_per_minute = self.rate_limit_per_minute;
        config
    }
}

fn read_env(var: Option<&str>) -> Option<String> {
    var.map(|v| v.trim_start_matches('$'))
        .and_then(|v| std::env::var(v).ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_config_defaults() {
        let service = ServiceConfig::new("files", "https://api.example.com", vec!["file".into()]);
        let rest = service.to_rest_config();
        assert_eq!(rest.name, "files");
        assert_eq!(rest.page_size, 100);
        assert_eq!(rest.timeout_secs, 30);
        assert_eq!(rest.features, vec![Feature::Sync, Feature::Caching]);
    }

    #[test]
    fn test_rest_config_overrides() {
        let mut service = ServiceConfig::new("files", "https://api.example.com", vec!["file".into()]);
        service.features = vec![Feature::Webhooks];
        service.page_size = Some(20);
        service.timeout_secs = Some(5);
        service.rate_limit_per_minute = Some(60);

        let rest = service.to_rest_config();
        assert_eq!(rest.features, vec![Feature::Webhooks]);
        assert_eq!(rest.page_size, 20);
        assert_eq!(rest.timeout_secs, 5);
        assert_eq!(rest.rate_limit_per_minute, Some(60));
    }

    #[test]
    fn test_client_id_from_env() {
        std::env::set_var("INTEGRATION_HUB_TEST_CLIENT_ID", "client-123");
        let service = ServiceConfig::new("files", "https://api.example.com", vec![]).with_oauth(
            "https://auth.example.com/token",
            "$INTEGRATION_HUB_TEST_CLIENT_ID",
            "INTEGRATION_HUB_TEST_UNSET_SECRET",
        );
        assert_eq!(service.client_id().as_deref(), Some("client-123"));
        assert!(service.client_secret().is_none());
    }
}
