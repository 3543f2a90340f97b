//! Credential store
//!
//! Caches credentials in memory, mirrors them encrypted into a
//! [`CredentialBackend`], and refreshes OAuth tokens through a
//! [`TokenEndpoint`].

use super::credentials::{OAuthCredentials, ServiceCredentials};
use super::crypto::CredentialCipher;
use super::oauth::{CodeExchange, RefreshExchange, TokenEndpoint};
use crate::error::IntegrationError;
use crate::metrics;
use crate::storage::CredentialBackend;
use crate::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credentials supplied by the environment rather than the backend
///
/// Checked after the in-memory cache and before the backend. For a service
/// named `files` the recognized variables are:
/// - `FILES_API_KEY`
/// - `FILES_USERNAME` + `FILES_PASSWORD`
/// - `FILES_ACCESS_TOKEN`, with optional `FILES_REFRESH_TOKEN`,
///   `FILES_CLIENT_ID` and `FILES_CLIENT_SECRET`
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, ServiceCredentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit entry
    pub fn with(mut self, service_name: impl Into<String>, credentials: ServiceCredentials) -> Self {
        self.entries.insert(service_name.into(), credentials);
        self
    }

    /// Read credentials for `services` from the process environment
    pub fn from_env<S: AsRef<str>>(services: &[S]) -> Self {
        Self::from_lookup(services, |var| std::env::var(var).ok())
    }

    /// Read credentials for `services` through an arbitrary variable lookup
    pub fn from_lookup<S, F>(services: &[S], lookup: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&str) -> Option<String>,
    {
        let mut entries = HashMap::new();
        for service in services {
            let service = service.as_ref();
            let prefix = env_prefix(service);
            let var = |suffix: &str| {
                lookup(&format!("{}_{}", prefix, suffix)).filter(|v| !v.is_empty())
            };

            let credentials = if let Some(api_key) = var("API_KEY") {
                Some(ServiceCredentials::api_key(api_key))
            } else if let (Some(username), Some(password)) = (var("USERNAME"), var("PASSWORD")) {
                Some(ServiceCredentials::basic(username, password))
            } else {
                var("ACCESS_TOKEN").map(|access_token| {
                    ServiceCredentials::OAuth(OAuthCredentials {
                        client_id: var("CLIENT_ID").unwrap_or_default(),
                        client_secret: var("CLIENT_SECRET").unwrap_or_default(),
                        access_token,
                        refresh_token: var("REFRESH_TOKEN"),
                        expires_at: None,
                        token_endpoint: None,
                        scopes: Vec::new(),
                    })
                })
            };

            if let Some(credentials) = credentials {
                debug!(service = service, kind = credentials.kind_name(), "Found static credentials");
                entries.insert(service.to_string(), credentials);
            }
        }
        Self { entries }
    }

    pub fn get(&self, service_name: &str) -> Option<&ServiceCredentials> {
        self.entries.get(service_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `files-v2` -> `FILES_V2`
fn env_prefix(service_name: &str) -> String {
    service_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-service credential cache backed by encrypted persistence
pub struct CredentialStore {
    cache: DashMap<String, ServiceCredentials>,
    backend: Arc<dyn CredentialBackend>,
    cipher: CredentialCipher,
    static_credentials: StaticCredentials,
    token_endpoint: Arc<dyn TokenEndpoint>,
    token_urls: DashMap<String, String>,
}

impl CredentialStore {
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        cipher: CredentialCipher,
        token_endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            cache: DashMap::new(),
            backend,
            cipher,
            static_credentials: StaticCredentials::default(),
            token_endpoint,
            token_urls: DashMap::new(),
        }
    }

    /// Use these environment-style credentials as a fallback
    pub fn with_static_credentials(mut self, static_credentials: StaticCredentials) -> Self {
        self.static_credentials = static_credentials;
        self
    }

    /// Configure the OAuth token URL for a service
    pub fn with_token_url(self, service_name: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.set_token_url(service_name, token_url);
        self
    }

    pub fn set_token_url(&self, service_name: impl Into<String>, token_url: impl Into<String>) {
        self.token_urls.insert(service_name.into(), token_url.into());
    }

    /// Upsert credentials in the backend and the cache
    pub async fn store(&self, service_name: &str, credentials: ServiceCredentials) -> Result<()> {
        let payload = self.encode(service_name, &credentials)?;
        self.backend.save(service_name, &payload).await?;
        self.cache.insert(service_name.to_string(), credentials);

        debug!(service = service_name, "Stored credentials");
        Ok(())
    }

    /// Look up credentials: cache, then static configuration, then the backend
    pub async fn get(&self, service_name: &str) -> Result<ServiceCredentials> {
        let cached = self.cache.get(service_name).map(|e| e.value().clone());
        if let Some(credentials) = cached {
            return Ok(credentials);
        }

        if let Some(credentials) = self.static_credentials.get(service_name) {
            return Ok(credentials.clone());
        }

        let payload = self.backend.load(service_name).await.map_err(|e| {
            IntegrationError::authentication(
                service_name,
                format!("Failed to load credentials: {}", e.message()),
            )
            .with_cause(e)
        })?;

        match payload {
            Some(payload) => {
                let credentials = self.decode(service_name, &payload)?;
                self.cache
                    .insert(service_name.to_string(), credentials.clone());
                Ok(credentials)
            }
            None => Err(IntegrationError::authentication(
                service_name,
                "No credentials found",
            )),
        }
    }

    /// True when credentials exist and, for OAuth, are outside the expiry buffer
    pub async fn has_valid(&self, service_name: &str) -> bool {
        match self.get(service_name).await {
            Ok(credentials) => credentials.is_valid_at(Utc::now()),
            Err(e) => {
                debug!(service = service_name, error = %e, "No valid credentials");
                false
            }
        }
    }

    /// Exchange the stored refresh token for a new access token
    pub async fn refresh_oauth(&self, service_name: &str) -> Result<ServiceCredentials> {
        let credentials = self.get(service_name).await?;
        let oauth = match credentials {
            ServiceCredentials::OAuth(oauth) => oauth,
            other => {
                return Err(IntegrationError::authentication(
                    service_name,
                    format!("Cannot refresh {} credentials", other.kind_name()),
                ))
            }
        };

        let refresh_token = oauth.refresh_token.clone().ok_or_else(|| {
            IntegrationError::authentication(service_name, "No refresh token available")
        })?;
        let token_url = self.token_url_for(service_name, &oauth)?;

        let request = RefreshExchange {
            service_name: service_name.to_string(),
            token_url,
            refresh_token,
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
        };

        let response = match self.token_endpoint.refresh(&request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_credential_refresh(service_name, false);
                warn!(service = service_name, error = %e, "OAuth refresh failed");
                return Err(IntegrationError::authentication(
                    service_name,
                    format!("Token refresh failed: {}", e.message()),
                )
                .with_cause(e));
            }
        };

        let refreshed = ServiceCredentials::OAuth(oauth.merge_refresh(response, Utc::now()));
        self.store(service_name, refreshed.clone()).await?;

        metrics::record_credential_refresh(service_name, true);
        info!(
            service = service_name,
            expires_at = ?refreshed.expires_at(),
            "Refreshed OAuth credentials"
        );
        Ok(refreshed)
    }

    /// Exchange an authorization code and store the resulting OAuth credentials
    pub async fn exchange_code(
        &self,
        service_name: &str,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<ServiceCredentials> {
        let token_url = self
            .token_urls
            .get(service_name)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                IntegrationError::authentication(service_name, "No token endpoint configured")
            })?;

        let request = CodeExchange {
            service_name: service_name.to_string(),
            token_url: token_url.clone(),
            code: code.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
        };

        let response = self
            .token_endpoint
            .exchange_code(&request)
            .await
            .map_err(|e| {
                IntegrationError::authentication(
                    service_name,
                    format!("Authorization code exchange failed: {}", e.message()),
                )
                .with_cause(e)
            })?;

        let mut oauth =
            OAuthCredentials::from_token_response(client_id, client_secret, response, Utc::now());
        oauth.token_endpoint = Some(token_url);

        let credentials = ServiceCredentials::OAuth(oauth);
        self.store(service_name, credentials.clone()).await?;

        info!(service = service_name, "Stored OAuth credentials from authorization code");
        Ok(credentials)
    }

    /// Remove credentials from the cache and the backend
    pub async fn delete(&self, service_name: &str) -> Result<()> {
        self.cache.remove(service_name);
        self.backend.remove(service_name).await?;

        info!(service = service_name, "Deleted credentials");
        Ok(())
    }

    /// Services with persisted credentials
    pub async fn stored_services(&self) -> Result<Vec<String>> {
        self.backend.list().await
    }

    fn token_url_for(&self, service_name: &str, oauth: &OAuthCredentials) -> Result<String> {
        self.token_urls
            .get(service_name)
            .map(|e| e.value().clone())
            .or_else(|| oauth.token_endpoint.clone())
            .ok_or_else(|| {
                IntegrationError::authentication(service_name, "No token endpoint configured")
            })
    }

    fn encode(&self, service_name: &str, credentials: &ServiceCredentials) -> Result<String> {
        let json = serde_json::to_vec(credentials).map_err(|e| {
            IntegrationError::validation(service_name, format!("Failed to serialize credentials: {}", e))
                .with_cause(e)
        })?;
        self.cipher.encrypt(service_name, &json).map_err(|e| {
            IntegrationError::unknown(service_name, format!("Failed to encrypt credentials: {}", e))
                .with_cause(e)
        })
    }

    fn decode(&self, service_name: &str, payload: &str) -> Result<ServiceCredentials> {
        let json = self.cipher.decrypt(service_name, payload).map_err(|e| {
            IntegrationError::authentication(
                service_name,
                format!("Stored credentials are unreadable: {}", e),
            )
            .with_cause(e)
        })?;
        serde_json::from_slice(&json).map_err(|e| {
            IntegrationError::authentication(
                service_name,
                format!("Stored credentials are malformed: {}", e),
            )
            .with_cause(e)
        })
    }
}
