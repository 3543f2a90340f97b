//! Integration tests for integration-hub
//!
//! These tests drive the public API end to end: error taxonomy, retry,
//! credential storage, sync jobs and the registry, plus the REST adapter
//! against a mock HTTP server.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use integration_hub::auth::{
    CodeExchange, CredentialCipher, CredentialStore, OAuthCredentials, RefreshExchange,
    ServiceCredentials, TokenEndpoint, TokenResponse,
};
use integration_hub::integrations::{
    AuthResult, AuthStatus, QueryOptions, Resource, ResourceQuery, RetryConfig,
    ServiceAdapter, ServiceCapabilities, SyncOptions, SyncResult,
};
use integration_hub::storage::{MemoryBackend, SqliteBackend, SqliteConfig};
use integration_hub::{ErrorKind, IntegrationError, IntegrationRegistry, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Token endpoint that hands out numbered access tokens
struct CannedTokens {
    issued: AtomicU32,
}

impl CannedTokens {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            issued: AtomicU32::new(0),
        })
    }

    fn next(&self) -> TokenResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        TokenResponse {
            access_token: format!("access-{}", n),
            refresh_token: Some(format!("refresh-{}", n)),
            expires_in: Some(3600),
            scope: None,
            token_type: Some("Bearer".to_string()),
        }
    }
}

#[async_trait]
impl TokenEndpoint for CannedTokens {
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse> {
        if request.code == "bad-code" {
            return Err(IntegrationError::validation(&request.service_name, "invalid_grant")
                .with_status(400));
        }
        Ok(self.next())
    }

    async fn refresh(&self, _request: &RefreshExchange) -> Result<TokenResponse> {
        Ok(self.next())
    }
}

fn memory_store(tokens: Arc<CannedTokens>) -> Arc<CredentialStore> {
    Arc::new(CredentialStore::new(
        Arc::new(MemoryBackend::new()),
        CredentialCipher::generate(),
        tokens,
    ))
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
        jitter: false,
    }
}

/// Adapter that records calls and returns a fixed sync outcome
struct RecordingAdapter {
    name: String,
    sync_outcome: Mutex<Result<SyncResult>>,
    sync_calls: AtomicU32,
    invalidations: Mutex<Vec<(String, Option<String>)>>,
    credentials: Mutex<Option<ServiceCredentials>>,
}

impl RecordingAdapter {
    fn new(name: &str) -> Self {
        let mut result = SyncResult::new("widgets", true);
        result.records_processed = 10;
        Self::with_outcome(name, Ok(result))
    }

    fn with_outcome(name: &str, outcome: Result<SyncResult>) -> Self {
        Self {
            name: name.to_string(),
            sync_outcome: Mutex::new(outcome),
            sync_calls: AtomicU32::new(0),
            invalidations: Mutex::new(Vec::new()),
            credentials: Mutex::new(None),
        }
    }

    fn sync_calls(&self) -> u32 {
        self.sync_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceAdapter for RecordingAdapter {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn set_credentials(&self, credentials: Option<ServiceCredentials>) {
        *self.credentials.lock() = credentials;
    }

    async fn fetch_resource(&self, t: &str, id: &str, _: &QueryOptions) -> Result<Resource> {
        Err(IntegrationError::resource_not_found(&self.name, format!("{}/{}", t, id)))
    }

    async fn fetch_resources(&self, _: &str, _: &ResourceQuery) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn create_resource(&self, t: &str, data: serde_json::Value) -> Result<Resource> {
        Ok(Resource::new(t, "new", data))
    }

    async fn update_resource(&self, t: &str, id: &str, data: serde_json::Value) -> Result<Resource> {
        Ok(Resource::new(t, id, data))
    }

    async fn delete_resource(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn sync_to_cache(&self, _: &str, _: &SyncOptions) -> Result<SyncResult> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.sync_outcome.lock().clone()
    }

    async fn invalidate_cache(&self, resource_type: &str, id: Option<&str>) -> Result<()> {
        self.invalidations
            .lock()
            .push((resource_type.to_string(), id.map(str::to_string)));
        Ok(())
    }

    async fn get_cached_resource(&self, _: &str, _: &str) -> Result<Option<Resource>> {
        Ok(None)
    }

    async fn get_cached_resources(&self, _: &str, _: &ResourceQuery) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn authenticate(&self) -> Result<AuthResult> {
        if self.credentials.lock().is_some() {
            Ok(AuthResult::success(&self.name, None))
        } else {
            Err(IntegrationError::authentication(&self.name, "Not authenticated"))
        }
    }

    async fn refresh_authentication(&self) -> Result<AuthResult> {
        self.authenticate().await
    }

    async fn check_auth_status(&self) -> AuthStatus {
        if self.credentials.lock().is_some() {
            AuthStatus::authenticated(None)
        } else {
            AuthStatus::unauthenticated("Not authenticated")
        }
    }

    fn service_capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities::uniform(&["widgets".to_string(), "file".to_string()], Vec::new())
    }
}

mod error_tests {
    use integration_hub::error::{classify, is_retryable, ProviderFailure};
    use integration_hub::{ErrorKind, IntegrationError};

    #[test]
    fn test_status_classification() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authorization),
            (404, ErrorKind::ResourceNotFound),
            (422, ErrorKind::Validation),
            (429, ErrorKind::RateLimit),
            (502, ErrorKind::ServiceUnavailable),
        ];
        for (status, kind) in cases {
            let raw = ProviderFailure::new("request failed").with_status(status);
            assert_eq!(classify(&raw), kind, "status {}", status);
        }
    }

    #[test]
    fn test_typed_errors_keep_their_kind() {
        let typed = IntegrationError::validation("svc", "connection refused").with_status(500);
        assert_eq!(classify(&typed), ErrorKind::Validation);
        assert!(!typed.is_retryable());
    }

    #[test]
    fn test_message_classification_and_retryability() {
        let timeout = ProviderFailure::new("Request timed out");
        assert_eq!(classify(&timeout), ErrorKind::Timeout);
        assert!(is_retryable(ErrorKind::Timeout, &timeout));

        let opaque = ProviderFailure::new("something odd");
        assert_eq!(classify(&opaque), ErrorKind::Unknown);
        assert!(!is_retryable(ErrorKind::Unknown, &opaque));
        assert!(is_retryable(
            ErrorKind::Unknown,
            &ProviderFailure::new("something odd").with_status(599)
        ));
    }

    #[test]
    fn test_from_failure_carries_context() {
        let err = IntegrationError::from_failure(
            "files",
            &ProviderFailure::new("Too Many Requests").with_status(429),
        );
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.service_name(), "files");
        assert_eq!(err.status_code(), Some(429));
        assert!(err.is_retryable());
    }
}

mod retry_tests {
    use super::*;
    use integration_hub::integrations::RetryStrategy;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_uses_every_attempt() {
        let config = RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            factor: 2.0,
            jitter: true,
        };
        let strategy = RetryStrategy::new(config.clone());
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&stamps);
        let result: Result<()> = strategy
            .execute("flaky", move || {
                seen.lock().push(Instant::now());
                async { Err(IntegrationError::network("svc", "connection reset")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 4);

        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "delays decreased: {:?}", gaps);
        }
        for gap in &gaps {
            assert!(*gap <= config.max_delay, "delay over cap: {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately() {
        let strategy = RetryStrategy::new(RetryConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<()> = strategy
            .execute("auth", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(IntegrationError::authentication("svc", "bad token")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now(), started);
    }
}

mod credential_tests {
    use super::*;
    use tempfile::TempDir;

    fn oauth_expiring_in(minutes: i64) -> ServiceCredentials {
        ServiceCredentials::OAuth(OAuthCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            access_token: "access-0".to_string(),
            refresh_token: Some("refresh-0".to_string()),
            expires_at: Some(Utc::now() + ChronoDuration::minutes(minutes)),
            token_endpoint: Some("https://auth.example.com/token".to_string()),
            scopes: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_oauth_inside_expiry_buffer_is_not_valid() {
        let store = memory_store(CannedTokens::new());

        store.store("soon", oauth_expiring_in(4)).await.unwrap();
        store.store("later", oauth_expiring_in(30)).await.unwrap();
        store
            .store("key", ServiceCredentials::api_key("k"))
            .await
            .unwrap();

        assert!(!store.has_valid("soon").await);
        assert!(store.has_valid("later").await);
        assert!(store.has_valid("key").await);
        assert!(!store.has_valid("missing").await);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_an_authentication_error() {
        let store = memory_store(CannedTokens::new());
        let err = store.get("nobody").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_refresh_replaces_tokens() {
        let store = memory_store(CannedTokens::new());
        store.store("files", oauth_expiring_in(1)).await.unwrap();

        let refreshed = store.refresh_oauth("files").await.unwrap();
        let oauth = refreshed.as_oauth().unwrap();
        assert_eq!(oauth.access_token, "access-1");
        assert_eq!(oauth.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(oauth.client_id, "client");
        assert!(store.has_valid("files").await);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let store = memory_store(CannedTokens::new());
        store
            .store("files", ServiceCredentials::api_key("k"))
            .await
            .unwrap();

        let err = store.refresh_oauth("files").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_sqlite_persists_encrypted_credentials() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig {
            path: dir.path().join("credentials.db"),
            wal_mode: true,
        };
        let key = [7u8; 32];

        {
            let store = CredentialStore::new(
                Arc::new(SqliteBackend::open(&config).unwrap()),
                CredentialCipher::new(key),
                CannedTokens::new(),
            );
            store
                .store("files", ServiceCredentials::basic("user", "pass"))
                .await
                .unwrap();
        }

        let raw = std::fs::read(&config.path).unwrap();
        assert!(!raw.windows(4).any(|w| w == b"pass"));

        let reopened = CredentialStore::new(
            Arc::new(SqliteBackend::open(&config).unwrap()),
            CredentialCipher::new(key),
            CannedTokens::new(),
        );
        let loaded = reopened.get("files").await.unwrap();
        assert_eq!(loaded, ServiceCredentials::basic("user", "pass"));

        reopened.delete("files").await.unwrap();
        assert!(reopened.get("files").await.is_err());
    }
}

mod sync_job_tests {
    use super::*;
    use integration_hub::sync::{JobStatus, SyncJob};

    #[tokio::test]
    async fn test_cancel_pending_job_never_calls_adapter() {
        let adapter = Arc::new(RecordingAdapter::new("svc"));
        let job = SyncJob::new(adapter.clone(), "widgets", SyncOptions::full(), fast_retry(3));

        job.cancel().unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().unwrap().kind(), ErrorKind::Cancelled);
        assert_eq!(adapter.sync_calls(), 0);
        assert!(job.start().await.is_err());
        assert_eq!(adapter.sync_calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let adapter = Arc::new(RecordingAdapter::new("svc"));
        let job = SyncJob::new(adapter, "widgets", SyncOptions::full(), fast_retry(3));
        let delivered = Arc::new(AtomicU32::new(0));

        job.on_complete(|_| panic!("listener bug"));
        let counter = Arc::clone(&delivered);
        job.on_complete(move |result| {
            assert_eq!(result.records_processed, 10);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = job.start().await.unwrap();
        assert!(result.successful);
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_job() {
        let adapter = Arc::new(RecordingAdapter::with_outcome(
            "svc",
            Err(IntegrationError::service_unavailable("svc", "down").with_status(503)),
        ));
        let job = SyncJob::new(adapter.clone(), "widgets", SyncOptions::default(), fast_retry(3));

        let err = job.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(adapter.sync_calls(), 3);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.end_time().is_some());
    }
}

mod registry_tests {
    use super::*;
    use integration_hub::integrations::{WebhookEvent, WebhookEventType};
    use integration_hub::registry::RegistryEvent;
    use integration_hub::sync::JobStatus;

    fn registry() -> IntegrationRegistry {
        IntegrationRegistry::new(memory_store(CannedTokens::new()), fast_retry(3))
    }

    #[tokio::test]
    async fn test_second_registration_replaces_first() {
        let registry = registry();
        let first = Arc::new(RecordingAdapter::new("svc"));
        let second = Arc::new(RecordingAdapter::new("svc"));

        registry.register_adapter(first.clone());
        registry.register_adapter(second.clone());

        assert_eq!(registry.list_services(), vec!["svc"]);
        registry
            .schedule_sync("svc", "widgets", SyncOptions::full())
            .await;
        assert_eq!(first.sync_calls(), 0);
        assert_eq!(second.sync_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_lookups_are_not_found() {
        let registry = registry();

        let err = registry.get_adapter("missing").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = registry.get_job_status("missing-id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = registry.cancel_job("missing-id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_schedule_sync_completes_and_untracks() {
        let registry = registry();
        registry.register_adapter(Arc::new(RecordingAdapter::new("svc")));

        let result = registry
            .schedule_sync("svc", "widgets", SyncOptions::full())
            .await;

        assert_eq!(result.status, JobStatus::Completed);
        let sync = result.result.as_ref().unwrap();
        assert!(sync.successful);
        assert_eq!(sync.records_processed, 10);
        assert!(sync.full_sync);
        assert!(result.job_id.starts_with("svc-widgets-"));
        assert!(registry.active_jobs().is_empty());
        assert!(registry.get_job_status(&result.job_id).is_err());
    }

    #[tokio::test]
    async fn test_schedule_sync_reports_failure_without_panicking() {
        let registry = registry();
        registry.register_adapter(Arc::new(RecordingAdapter::with_outcome(
            "svc",
            Err(IntegrationError::authorization("svc", "forbidden").with_status(403)),
        )));

        let result = registry
            .schedule_sync("svc", "widgets", SyncOptions::default())
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error.unwrap().kind(), ErrorKind::Authorization);
        assert!(registry.active_jobs().is_empty());

        let missing = registry
            .schedule_sync("nope", "widgets", SyncOptions::default())
            .await;
        assert_eq!(missing.status, JobStatus::Failed);
        assert_eq!(missing.error.unwrap().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_webhook_invalidates_exactly_once() {
        let registry = registry();
        let adapter = Arc::new(RecordingAdapter::new("svc"));
        registry.register_adapter(adapter.clone());

        let event = WebhookEvent {
            event_type: WebhookEventType::Update,
            resource_type: "file".to_string(),
            resource_id: "42".to_string(),
            data: serde_json::json!({"name": "report.pdf"}),
            timestamp: Utc::now(),
        };
        registry.process_webhook("svc", &event).await.unwrap();

        assert_eq!(
            *adapter.invalidations.lock(),
            vec![("file".to_string(), Some("42".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_credentials_flow_through_to_adapter() {
        let registry = registry();
        let adapter = Arc::new(RecordingAdapter::new("svc"));
        registry.register_adapter(adapter.clone());
        let mut events = registry.subscribe();

        let err = registry.initialize_adapter("svc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        registry
            .update_credentials("svc", ServiceCredentials::api_key("k"))
            .await
            .unwrap();
        assert!(adapter.credentials.lock().is_some());
        assert!(matches!(
            events.try_recv().unwrap(),
            RegistryEvent::CredentialsUpdated { kind: "api_key", .. }
        ));

        let auth = registry.initialize_adapter("svc").await.unwrap();
        assert!(auth.authenticated);
        assert!(registry.check_integration_status("svc").await.unwrap().auth.authenticated);

        registry.remove_credentials("svc").await.unwrap();
        assert!(adapter.credentials.lock().is_none());
        assert!(!registry.check_integration_status("svc").await.unwrap().auth.authenticated);
    }

    #[tokio::test]
    async fn test_oauth_callback_stores_credentials() {
        let store = CredentialStore::new(
            Arc::new(MemoryBackend::new()),
            CredentialCipher::generate(),
            CannedTokens::new(),
        )
        .with_token_url("svc", "https://auth.example.com/token");
        let registry = IntegrationRegistry::new(Arc::new(store), fast_retry(3));
        let adapter = Arc::new(RecordingAdapter::new("svc"));
        registry.register_adapter(adapter.clone());

        let credentials = registry
            .handle_oauth_callback("svc", "good-code", "client", "secret", "https://app/cb")
            .await
            .unwrap();
        let oauth = credentials.as_oauth().unwrap();
        assert_eq!(oauth.access_token, "access-1");
        assert!(oauth.expires_at.unwrap() > Utc::now() + ChronoDuration::minutes(55));
        assert!(adapter.credentials.lock().is_some());
        assert!(registry.credential_store().has_valid("svc").await);

        let err = registry
            .handle_oauth_callback("svc", "bad-code", "client", "secret", "https://app/cb")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}

mod rest_end_to_end_tests {
    use super::*;
    use integration_hub::config::{HubConfig, ServiceConfig};
    use integration_hub::sync::JobStatus;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_config_to_synced_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer secret-key"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "1", "name": "a.txt"},
                    {"id": 2, "name": "b.txt"}
                ]
            })))
            .mount(&server)
            .await;

        let mut config = HubConfig::new();
        config.credentials.backend = integration_hub::config::BackendKind::Memory;
        config.retry.max_attempts = 2;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        config.add_service(ServiceConfig::new(
            "files",
            server.uri(),
            vec!["files".to_string()],
        ));

        let registry = config.build_registry().unwrap();
        registry
            .update_credentials("files", ServiceCredentials::api_key("secret-key"))
            .await
            .unwrap();

        let result = registry
            .schedule_sync("files", "files", SyncOptions::full().with_batch_size(10))
            .await;
        assert_eq!(result.status, JobStatus::Completed, "{:?}", result.error);
        assert_eq!(result.result.unwrap().records_processed, 2);

        let adapter = registry.get_adapter("files").unwrap();
        let cached = adapter
            .get_cached_resource("files", "2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.data["name"], "b.txt");

        let unsupported = registry
            .schedule_sync("files", "folders", SyncOptions::default())
            .await;
        assert_eq!(unsupported.error.unwrap().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_job_and_page_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = HubConfig::new();
        config.credentials.backend = integration_hub::config::BackendKind::Memory;
        config.retry.max_attempts = 3;
        config.retry.page_attempts = 2;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        config.add_service(ServiceConfig::new(
            "files",
            server.uri(),
            vec!["files".to_string()],
        ));

        let registry = config.build_registry().unwrap();
        registry
            .update_credentials("files", ServiceCredentials::api_key("secret-key"))
            .await
            .unwrap();

        let result = registry
            .schedule_sync("files", "files", SyncOptions::default())
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error.unwrap().kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(server.received_requests().await.unwrap().len(), 6);
    }
}
