//! Configuration system
//!
//! Loads ~/.config/integration-hub/config.yaml with support for:
//! - Credential storage backend and master key location
//! - Retry settings shared by adapters and sync jobs
//! - Per-service provider settings (base URL, resources, OAuth endpoints)

mod hub_config;
mod service;
pub mod validation;

pub use hub_config::{
    BackendKind, CredentialsConfig, HubConfig, RetrySettings, DEFAULT_MASTER_KEY_ENV,
};
pub use service::ServiceConfig;
pub use validation::{validate_config, validate_config_result, ValidationError};

use crate::error::IntegrationError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading configuration or building from it
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Setup failed: {0}")]
    Integration(#[from] IntegrationError),
}
