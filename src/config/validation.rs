//! Configuration validation
//!
//! Validates integration-hub configuration for correctness:
//! - No duplicate or empty service names
//! - Valid base and token URLs
//! - Sane retry settings
//! - OAuth client variables only alongside a token URL

use super::hub_config::HubConfig;
use super::service::ServiceConfig;
use super::ConfigError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub service: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref service) = self.service {
            write!(f, "[{}] {}: {}", service, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate an integration-hub configuration
pub fn validate_config(config: &HubConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.credentials.master_key_env.trim().is_empty() {
        errors.push(ValidationError::new(
            "credentials.master_key_env",
            "Master key variable name cannot be empty",
        ));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            "retry.max_attempts",
            "Must be at least 1",
        ));
    }
    if retry.page_attempts == 0 {
        errors.push(ValidationError::new(
            "retry.page_attempts",
            "Must be at least 1",
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "Base delay ({}ms) exceeds max delay ({}ms)",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        ));
    }
    if !retry.factor.is_finite() || retry.factor < 1.0 {
        errors.push(ValidationError::new(
            "retry.factor",
            format!("Backoff factor must be >= 1.0, got {}", retry.factor),
        ));
    }

    let mut seen_names = HashSet::new();
    for service in &config.services {
        if !seen_names.insert(&service.name) {
            errors.push(ValidationError::new(
                "services",
                format!("Duplicate service name: {}", service.name),
            ));
        }
    }

    for service in &config.services {
        if let Err(mut service_errors) = validate_service(service) {
            errors.append(&mut service_errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single service entry
fn validate_service(service: &ServiceConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if service.name.is_empty() {
        errors.push(ValidationError::new("name", "Service name cannot be empty"));
    } else if service.name.chars().any(char::is_whitespace) {
        errors.push(
            ValidationError::new("name", "Service name cannot contain whitespace")
                .with_service(&service.name),
        );
    }

    if !is_http_url(&service.base_url) {
        errors.push(
            ValidationError::new("base_url", format!("Invalid URL: {}", service.base_url))
                .with_service(&service.name),
        );
    }

    if service.resources.is_empty() {
        errors.push(
            ValidationError::new("resources", "At least one resource type must be listed")
                .with_service(&service.name),
        );
    }

    if service.page_size == Some(0) {
        errors.push(
            ValidationError::new("page_size", "Page size must be greater than 0")
                .with_service(&service.name),
        );
    }

    match &service.token_url {
        Some(token_url) if !is_http_url(token_url) => {
            errors.push(
                ValidationError::new("token_url", format!("Invalid URL: {}", token_url))
                    .with_service(&service.name),
            );
        }
        Some(_) => {
            for var in [&service.client_id_env, &service.client_secret_env]
                .into_iter()
                .flatten()
            {
                let var = var.trim_start_matches('$');
                if std::env::var(var).is_err() {
                    tracing::warn!(
                        service = %service.name,
                        env_var = %var,
                        "Environment variable not set (this may be intentional if set at runtime)"
                    );
                }
            }
        }
        None => {
            if service.client_id_env.is_some() || service.client_secret_env.is_some() {
                errors.push(
                    ValidationError::new(
                        "token_url",
                        "OAuth client variables require a token_url",
                    )
                    .with_service(&service.name),
                );
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &HubConfig) -> std::result::Result<(), ConfigError> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ConfigError::Validation(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
