//! Generic JSON REST adapter
//!
//! Talks to providers that expose one collection endpoint per resource type:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch     | `GET {base}/{type}/{id}` |
//! | list      | `GET {base}/{type}?limit=&offset=&since=&...` |
//! | create    | `POST {base}/{type}` |
//! | update    | `PATCH {base}/{type}/{id}` |
//! | delete    | `DELETE {base}/{type}/{id}` |
//!
//! List endpoints may answer with a bare JSON array or with `{"data": [...]}`.
//! Path segments are percent-encoded.
//!
//! `sync_to_cache` retries each page under the adapter's own [`RetryConfig`].
//! A [`SyncJob`](crate::sync::SyncJob) retries the whole sync on top of that,
//! so the two attempt counts multiply.

use super::adapter::{CredentialSlot, ServiceAdapter};
use super::retry::{RetryConfig, RetryStrategy};
use super::types::{
    AuthResult, AuthStatus, Feature, QueryOptions, RateLimit, Resource, ResourceQuery,
    ServiceCapabilities, SyncOptions, SyncResult, DEFAULT_BATCH_SIZE,
};
use crate::auth::{RefreshExchange, ServiceCredentials, TokenEndpoint};
use crate::cache::{CacheConfig, ResourceCache};
use crate::error::{IntegrationError, ProviderFailure};
use crate::{metrics, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one REST provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestServiceConfig {
    /// Service name the adapter registers under
    pub name: String,

    /// API root, without a trailing slash
    pub base_url: String,

    /// Resource types (collection names) this provider exposes
    pub resources: Vec<String>,

    #[serde(default)]
    pub features: Vec<Feature>,

    /// Path requested by `authenticate()`; credentials are only checked
    /// locally when unset
    #[serde(default)]
    pub auth_probe_path: Option<String>,

    /// Default list page size
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

fn default_page_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl RestServiceConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        resources: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            resources,
            features: vec![Feature::Sync, Feature::Caching],
            auth_probe_path: None,
            page_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            rate_limit_per_minute: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// [`ServiceAdapter`] for JSON REST providers
pub struct RestAdapter {
    config: RestServiceConfig,
    base_url: String,
    client: Client,
    credentials: CredentialSlot,
    cache: ResourceCache,
    retry: RetryStrategy,
    token_endpoint: Option<Arc<dyn TokenEndpoint>>,
}

impl RestAdapter {
    /// Create a new adapter
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: RestServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IntegrationError::from_reqwest(&config.name, e))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: RestServiceConfig, client: Client) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            config,
            base_url,
            client,
            credentials: CredentialSlot::new(),
            cache: ResourceCache::default(),
            retry: RetryStrategy::default(),
            token_endpoint: None,
        }
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryStrategy::new(config);
        self
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = ResourceCache::new(config);
        self
    }

    /// Token endpoint used by `refresh_authentication`
    pub fn with_token_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    pub fn config(&self) -> &RestServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn url(&self, resource_type: &str, id: Option<&str>) -> String {
        let collection = urlencoding::encode(resource_type);
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, collection, urlencoding::encode(id)),
            None => format!("{}/{}", self.base_url, collection),
        }
    }

    /// Credentials, then resource type; nothing is sent if either check fails
    fn preflight(&self, resource_type: &str) -> Result<ServiceCredentials> {
        let credentials = self.credentials.require(self.name())?;
        self.service_capabilities()
            .ensure_supported(self.name(), resource_type)?;
        Ok(credentials)
    }

    fn authorize(&self, request: RequestBuilder, credentials: &ServiceCredentials) -> RequestBuilder {
        match credentials {
            ServiceCredentials::ApiKey { api_key } => request.bearer_auth(api_key),
            ServiceCredentials::OAuth(oauth) => request.bearer_auth(&oauth.access_token),
            ServiceCredentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        credentials: &ServiceCredentials,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let mut request = self.authorize(request, credentials);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.record(IntegrationError::from_reqwest(self.name(), e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        let message = match (status, retry_after) {
            (StatusCode::TOO_MANY_REQUESTS, Some(after)) => {
                format!("HTTP {}: retry after {} seconds: {}", status, after, body)
            }
            _ => format!("HTTP {}: {}", status, body),
        };
        let failure = ProviderFailure::new(message).with_status(status.as_u16());
        Err(self.record(IntegrationError::from_failure(self.name(), &failure)))
    }

    async fn read_json(&self, response: Response) -> Result<Value> {
        response.json::<Value>().await.map_err(|e| {
            self.record(
                IntegrationError::validation(self.name(), format!("Invalid JSON response: {}", e))
                    .with_cause(e),
            )
        })
    }

    fn record(&self, error: IntegrationError) -> IntegrationError {
        metrics::record_error(error.kind().as_str(), self.name());
        error
    }

    fn to_resource(&self, resource_type: &str, value: Value) -> Result<Resource> {
        let id = match value.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(IntegrationError::validation(
                    self.name(),
                    format!("{} record has no id", resource_type),
                ))
            }
        };

        let updated_at = value
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Resource {
            id,
            resource_type: resource_type.to_string(),
            data: value,
            updated_at,
        })
    }

    fn list_items(&self, body: Value) -> Result<Vec<Value>> {
        match body {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(IntegrationError::validation(
                    self.name(),
                    "List response has no data array",
                )),
            },
            _ => Err(IntegrationError::validation(
                self.name(),
                "Unexpected list response",
            )),
        }
    }

    async fn fetch_page(
        &self,
        resource_type: &str,
        credentials: &ServiceCredentials,
        params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>> {
        let request = self.client.get(self.url(resource_type, None)).query(params);
        let response = self.send(request, credentials, timeout).await?;
        let body = self.read_json(response).await?;
        self.list_items(body)
    }
}

fn list_params(
    limit: usize,
    offset: usize,
    since: Option<DateTime<Utc>>,
    filters: &std::collections::BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ];
    if let Some(since) = since {
        params.push(("since".to_string(), since.to_rfc3339()));
    }
    params.extend(filters.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
}

#[async_trait]
impl ServiceAdapter for RestAdapter {
    fn service_name(&self) -> &str {
        self.name()
    }

    fn set_credentials(&self, credentials: Option<ServiceCredentials>) {
        debug!(
            service = self.name(),
            kind = credentials.as_ref().map(|c| c.kind_name()),
            "Updating adapter credentials"
        );
        self.credentials.set(credentials);
    }

    async fn fetch_resource(
        &self,
        resource_type: &str,
        id: &str,
        options: &QueryOptions,
    ) -> Result<Resource> {
        let credentials = self.preflight(resource_type)?;

        if !options.bypass_cache {
            if let Some(cached) = self.cache.get(resource_type, id) {
                return Ok(cached);
            }
        }

        debug!(service = self.name(), resource_type, id, "Fetching resource");

        let mut request = self.client.get(self.url(resource_type, Some(id)));
        if !options.fields.is_empty() {
            request = request.query(&[("fields", options.fields.join(","))]);
        }
        if options.include_deleted {
            request = request.query(&[("include_deleted", "true")]);
        }

        let response = self.send(request, &credentials, options.timeout).await?;
        let body = self.read_json(response).await?;
        let resource = self.to_resource(resource_type, body)?;

        self.cache.put(resource.clone());
        Ok(resource)
    }

    async fn fetch_resources(
        &self,
        resource_type: &str,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>> {
        let credentials = self.preflight(resource_type)?;

        let params = list_params(
            query.limit.unwrap_or(self.config.page_size),
            query.offset.unwrap_or(0),
            query.since,
            &query.filters,
        );

        debug!(service = self.name(), resource_type, "Listing resources");

        let items = self
            .fetch_page(resource_type, &credentials, &params, query.timeout)
            .await?;

        let resources = items
            .into_iter()
            .map(|item| self.to_resource(resource_type, item))
            .collect::<Result<Vec<_>>>()?;

        for resource in &resources {
            self.cache.put(resource.clone());
        }
        Ok(resources)
    }

    async fn create_resource(&self, resource_type: &str, data: Value) -> Result<Resource> {
        let credentials = self.preflight(resource_type)?;

        info!(service = self.name(), resource_type, "Creating resource");

        let request = self.client.post(self.url(resource_type, None)).json(&data);
        let response = self.send(request, &credentials, None).await?;
        let body = self.read_json(response).await?;
        let resource = self.to_resource(resource_type, body)?;

        self.cache.put(resource.clone());
        Ok(resource)
    }

    async fn update_resource(&self, resource_type: &str, id: &str, data: Value) -> Result<Resource> {
        let credentials = self.preflight(resource_type)?;

        info!(service = self.name(), resource_type, id, "Updating resource");

        let request = self.client.patch(self.url(resource_type, Some(id))).json(&data);
        let response = self.send(request, &credentials, None).await?;
        let body = self.read_json(response).await?;
        let resource = self.to_resource(resource_type, body)?;

        self.cache.put(resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&self, resource_type: &str, id: &str) -> Result<()> {
        let credentials = self.preflight(resource_type)?;

        info!(service = self.name(), resource_type, id, "Deleting resource");

        let request = self.client.delete(self.url(resource_type, Some(id)));
        self.send(request, &credentials, None).await?;

        self.cache.invalidate(resource_type, id);
        Ok(())
    }

    async fn sync_to_cache(&self, resource_type: &str, options: &SyncOptions) -> Result<SyncResult> {
        let credentials = self.preflight(resource_type)?;
        if options.batch_size == 0 {
            return Err(IntegrationError::validation(
                self.name(),
                "batch_size must be greater than zero",
            ));
        }

        let started = std::time::Instant::now();
        let mut result = SyncResult::new(resource_type, options.full_sync);

        let operation = format!("{}.sync_to_cache", self.name());
        let mut offset = 0usize;
        // A full sync drops the cached type only once the first page has arrived
        let mut pending_clear = options.full_sync;

        while offset < options.max_records {
            let limit = options.batch_size.min(options.max_records - offset);
            let params = list_params(limit, offset, options.since_timestamp, &options.filters);

            let mut page = self
                .retry
                .execute(&operation, || {
                    self.fetch_page(resource_type, &credentials, &params, options.timeout)
                })
                .await?;

            if pending_clear {
                let cleared = self.cache.clear_type(resource_type);
                debug!(service = self.name(), resource_type, cleared, "Cleared cache for full sync");
                pending_clear = false;
            }

            if page.len() > limit {
                warn!(
                    service = self.name(),
                    resource_type,
                    limit,
                    returned = page.len(),
                    "Provider ignored page limit"
                );
                page.truncate(limit);
            }

            let fetched = page.len();
            for item in page {
                match self.to_resource(resource_type, item) {
                    Ok(resource) => {
                        self.cache.put(resource);
                        result.records_processed += 1;
                    }
                    Err(e) => {
                        warn!(service = self.name(), resource_type, error = %e, "Skipping record");
                        result.record_failure(e);
                    }
                }
            }

            debug!(
                service = self.name(),
                resource_type,
                offset,
                fetched,
                "Synced page"
            );

            if fetched < limit {
                break;
            }
            offset += fetched;
        }

        result.successful = result.records_failed == 0;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.timestamp = Utc::now();

        info!(
            service = self.name(),
            resource_type,
            processed = result.records_processed,
            failed = result.records_failed,
            "Sync to cache complete"
        );
        Ok(result)
    }

    async fn invalidate_cache(&self, resource_type: &str, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                self.cache.invalidate(resource_type, id);
            }
            None => {
                self.cache.clear_type(resource_type);
            }
        }
        debug!(service = self.name(), resource_type, id, "Invalidated cache");
        Ok(())
    }

    async fn get_cached_resource(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        self.service_capabilities()
            .ensure_supported(self.name(), resource_type)?;
        Ok(self.cache.get(resource_type, id))
    }

    async fn get_cached_resources(
        &self,
        resource_type: &str,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>> {
        self.service_capabilities()
            .ensure_supported(self.name(), resource_type)?;
        Ok(self.cache.list(resource_type, query))
    }

    async fn authenticate(&self) -> Result<AuthResult> {
        let credentials = self.credentials.require(self.name())?;

        if !credentials.is_valid_at(Utc::now()) {
            return Err(IntegrationError::authentication(
                self.name(),
                "Access token expired",
            ));
        }

        if let Some(probe) = &self.config.auth_probe_path {
            let url = format!("{}/{}", self.base_url, probe.trim_start_matches('/'));
            self.send(self.client.get(url), &credentials, None).await?;
        }

        info!(service = self.name(), "Authenticated");
        Ok(AuthResult::success(self.name(), credentials.expires_at()))
    }

    async fn refresh_authentication(&self) -> Result<AuthResult> {
        let credentials = self.credentials.require(self.name())?;
        let oauth = credentials.as_oauth().ok_or_else(|| {
            IntegrationError::authentication(
                self.name(),
                format!("Cannot refresh {} credentials", credentials.kind_name()),
            )
        })?;
        let endpoint = self.token_endpoint.as_ref().ok_or_else(|| {
            IntegrationError::authentication(self.name(), "No token endpoint configured")
        })?;
        let refresh_token = oauth.refresh_token.clone().ok_or_else(|| {
            IntegrationError::authentication(self.name(), "No refresh token available")
        })?;
        let token_url = oauth.token_endpoint.clone().ok_or_else(|| {
            IntegrationError::authentication(self.name(), "No token endpoint configured")
        })?;

        let request = RefreshExchange {
            service_name: self.name().to_string(),
            token_url,
            refresh_token,
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
        };

        let response = endpoint.refresh(&request).await.map_err(|e| {
            metrics::record_credential_refresh(self.name(), false);
            IntegrationError::authentication(
                self.name(),
                format!("Token refresh failed: {}", e.message()),
            )
            .with_cause(e)
        })?;

        let refreshed = ServiceCredentials::OAuth(oauth.clone().merge_refresh(response, Utc::now()));
        let expires_at = refreshed.expires_at();
        self.credentials.set(Some(refreshed));
        metrics::record_credential_refresh(self.name(), true);

        info!(service = self.name(), expires_at = ?expires_at, "Refreshed adapter credentials");
        Ok(AuthResult::success(self.name(), expires_at))
    }

    async fn check_auth_status(&self) -> AuthStatus {
        match self.credentials.get() {
            None => AuthStatus::unauthenticated("Not authenticated"),
            Some(credentials) if !credentials.is_valid_at(Utc::now()) => {
                AuthStatus::unauthenticated("Access token expired")
            }
            Some(credentials) => AuthStatus::authenticated(credentials.expires_at()),
        }
    }

    fn service_capabilities(&self) -> ServiceCapabilities {
        let mut capabilities =
            ServiceCapabilities::uniform(&self.config.resources, self.config.features.clone());
        capabilities.rate_limit = self
            .config
            .rate_limit_per_minute
            .map(|requests_per_minute| RateLimit {
                requests_per_minute,
            });
        capabilities
    }
}
