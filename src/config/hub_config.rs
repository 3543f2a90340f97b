//! Top-level configuration file

use super::service::ServiceConfig;
use super::{ConfigError, ConfigResult};
use crate::auth::{CredentialCipher, CredentialStore, HttpTokenEndpoint, StaticCredentials, TokenEndpoint};
use crate::integrations::{RestAdapter, RetryConfig};
use crate::registry::IntegrationRegistry;
use crate::storage::{CredentialBackend, MemoryBackend, SqliteBackend, SqliteConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default environment variable for the credential master key
pub const DEFAULT_MASTER_KEY_ENV: &str = "INTEGRATION_HUB_MASTER_KEY";

/// Where credentials are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
}

/// Credential storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// SQLite database path; `~/` is expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Environment variable holding the base64 master key
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

fn default_master_key_env() -> String {
    DEFAULT_MASTER_KEY_ENV.to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: None,
            master_key_env: default_master_key_env(),
        }
    }
}

impl CredentialsConfig {
    /// SQLite path with `~/` expanded, or the default location
    pub fn sqlite_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => expand_home(path),
            None => SqliteConfig::default().path,
        }
    }
}

/// Retry settings, in milliseconds
///
/// Sync jobs restart a failed sync up to `max_attempts` times. Each page a
/// sync fetches is retried inside the adapter up to `page_attempts` times, so
/// one job sends at most `max_attempts * page_attempts` requests per page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts per adapter request (list pages during sync)
    #[serde(default = "default_page_attempts")]
    pub page_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_page_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            page_attempts: default_page_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
            jitter: self.jitter,
        }
    }

    /// Policy for the adapter's own per-request retries
    pub fn to_page_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.page_attempts,
            ..self.to_retry_config()
        }
    }
}

/// integration-hub configuration
///
/// Represents the complete ~/.config/integration-hub/config.yaml file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl HubConfig {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the default path (~/.config/integration-hub/config.yaml)
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        tracing::info!(path = %path.display(), "Loading integration-hub configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            services = config.services.len(),
            backend = ?config.credentials.backend,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving integration-hub configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/integration-hub/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("integration-hub");
        path.push("config.yaml");
        path
    }

    pub fn get_service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn add_service(&mut self, service: ServiceConfig) {
        self.services.push(service);
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Open the configured credential backend
    pub fn open_backend(&self) -> ConfigResult<Arc<dyn CredentialBackend>> {
        let backend: Arc<dyn CredentialBackend> = match self.credentials.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&SqliteConfig {
                path: self.credentials.sqlite_path(),
                wal_mode: true,
            })?),
        };
        Ok(backend)
    }

    /// Cipher keyed from `master_key_env`
    ///
    /// The in-memory backend falls back to an ephemeral key; persistent
    /// backends require the variable, since data written under a random key
    /// could never be read back.
    pub fn cipher(&self) -> ConfigResult<CredentialCipher> {
        let var = &self.credentials.master_key_env;
        match CredentialCipher::from_env(var) {
            Ok(cipher) => Ok(cipher),
            Err(_) if self.credentials.backend == BackendKind::Memory => {
                tracing::debug!(var = %var, "Using an ephemeral credential key");
                Ok(CredentialCipher::generate())
            }
            Err(e) => Err(ConfigError::Validation(format!(
                "{} must hold a base64-encoded 32-byte key: {}",
                var, e
            ))),
        }
    }

    /// Build a registry with one REST adapter per configured service
    pub fn build_registry(&self) -> ConfigResult<IntegrationRegistry> {
        super::validation::validate_config_result(self)?;

        let token_endpoint: Arc<dyn TokenEndpoint> = Arc::new(HttpTokenEndpoint::new()?);
        let names = self.service_names();

        let mut store = CredentialStore::new(
            self.open_backend()?,
            self.cipher()?,
            Arc::clone(&token_endpoint),
        )
        .with_static_credentials(StaticCredentials::from_env(&names));
        for service in &self.services {
            if let Some(token_url) = &service.token_url {
                store = store.with_token_url(service.name.clone(), token_url.clone());
            }
        }

        let registry = IntegrationRegistry::new(Arc::new(store), self.retry.to_retry_config());
        for service in &self.services {
            let adapter = RestAdapter::new(service.to_rest_config())?
                .with_retry(self.retry.to_page_retry_config())
                .with_token_endpoint(Arc::clone(&token_endpoint));
            registry.register_adapter(Arc::new(adapter));
        }

        Ok(registry)
    }
}

/// `~/x` -> `$HOME/x`
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
