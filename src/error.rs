//! Error types for integration-hub
//!
//! Every failure the framework surfaces is an [`IntegrationError`] carrying a
//! classified [`ErrorKind`]. The taxonomy functions in this module turn raw
//! provider failures (HTTP errors, status codes, free-form messages) into a
//! kind and derive retryability from that kind alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for integration-hub operations
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Classified failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials missing, expired or rejected
    Authentication,

    /// Credentials valid but lacking permission
    Authorization,

    /// Provider throttled the request
    RateLimit,

    /// Remote resource does not exist
    ResourceNotFound,

    /// Request rejected as malformed, or an invalid state transition
    Validation,

    /// Provider is failing (5xx)
    ServiceUnavailable,

    /// Transport-level failure
    Network,

    /// Request did not complete in time
    Timeout,

    /// Local lookup failed (unknown service, unknown job, unsupported resource type)
    NotFound,

    /// Sync job cancelled or paused cooperatively
    Cancelled,

    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Stable snake_case name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Short operator-facing hint for this kind of failure
    pub fn recommendation(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Reconnect the integration",
            ErrorKind::Authorization => "Grant the integration the required permissions",
            ErrorKind::RateLimit => "Wait a few minutes before retrying",
            ErrorKind::ResourceNotFound => "The item may have been moved or deleted remotely",
            ErrorKind::Validation => "Check the submitted data",
            ErrorKind::ServiceUnavailable => "The provider is having problems, try again later",
            ErrorKind::Network => "Check your network connection",
            ErrorKind::Timeout => "The provider is slow to respond, try again",
            ErrorKind::NotFound => "Check that the integration is configured",
            ErrorKind::Cancelled => "The operation was cancelled",
            ErrorKind::Unknown => "Try again, and contact support if it keeps failing",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The framework's single typed error
///
/// `retryable` is never set directly: constructors derive it from the kind
/// (and, for [`ErrorKind::Unknown`], from the status code).
#[derive(Debug, Clone, Error, Serialize)]
#[error("[{kind}] {service_name}: {message}")]
pub struct IntegrationError {
    kind: ErrorKind,
    message: String,
    service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    retryable: bool,
    #[source]
    #[serde(skip)]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl IntegrationError {
    /// Create a new error of the given kind
    pub fn new(kind: ErrorKind, service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            service_name: service_name.into(),
            status_code: None,
            retryable: retryable_for(kind, None),
            cause: None,
        }
    }

    pub fn authentication(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, service_name, message)
    }

    pub fn authorization(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, service_name, message)
    }

    pub fn not_found(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, service_name, message)
    }

    pub fn resource_not_found(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, service_name, message)
    }

    pub fn validation(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, service_name, message)
    }

    pub fn network(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, service_name, message)
    }

    pub fn timeout(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, service_name, message)
    }

    pub fn rate_limited(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, service_name, message)
    }

    pub fn service_unavailable(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, service_name, message)
    }

    pub fn cancelled(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, service_name, message)
    }

    pub fn unknown(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, service_name, message)
    }

    /// Attach a provider status code, re-deriving retryability
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self.retryable = retryable_for(self.kind, self.status_code);
        self
    }

    /// Attach the underlying cause
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Wrap any failure signal, classifying it through the taxonomy
    ///
    /// A failure that already is an `IntegrationError` is returned unchanged.
    pub fn from_failure<F>(service_name: impl Into<String>, raw: &F) -> Self
    where
        F: FailureSignal + ?Sized,
    {
        if let Some(typed) = raw.integration_error() {
            return typed.clone();
        }

        let kind = classify(raw);
        let mut error = Self::new(kind, service_name, raw.failure_message());
        if let Some(status) = raw.status_code() {
            error = error.with_status(status);
        }
        error
    }

    /// Wrap a reqwest error, keeping it as the cause
    pub fn from_reqwest(service_name: impl Into<String>, err: reqwest::Error) -> Self {
        Self::from_failure(service_name, &err).with_cause(err)
    }

    /// Wrap an anyhow error, keeping it as the cause
    pub fn from_anyhow(service_name: impl Into<String>, err: anyhow::Error) -> Self {
        if let Some(typed) = err.downcast_ref::<IntegrationError>() {
            return typed.clone();
        }
        let error = Self::from_failure(service_name, &err);
        let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
        Self {
            cause: Some(Arc::from(boxed)),
            ..error
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Anything the taxonomy can inspect
///
/// Implementations expose whatever they know: an already-typed error, an
/// HTTP-like status, and a message.
pub trait FailureSignal {
    /// The typed error, if this failure already is one
    fn integration_error(&self) -> Option<&IntegrationError> {
        None
    }

    /// Numeric HTTP-like status, if any
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Human-readable description, including any source chain
    fn failure_message(&self) -> String;
}

impl FailureSignal for IntegrationError {
    fn integration_error(&self) -> Option<&IntegrationError> {
        Some(self)
    }

    fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    fn failure_message(&self) -> String {
        self.message.clone()
    }
}

impl FailureSignal for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }

    fn failure_message(&self) -> String {
        let chain = error_chain(self);
        if self.is_timeout() {
            format!("request timed out: {}", chain)
        } else if self.is_connect() {
            format!("connection failed: {}", chain)
        } else {
            chain
        }
    }
}

impl FailureSignal for anyhow::Error {
    fn integration_error(&self) -> Option<&IntegrationError> {
        self.downcast_ref::<IntegrationError>()
    }

    fn status_code(&self) -> Option<u16> {
        self.downcast_ref::<reqwest::Error>()
            .and_then(|e| e.status())
            .map(|s| s.as_u16())
    }

    fn failure_message(&self) -> String {
        format!("{:#}", self)
    }
}

impl FailureSignal for str {
    fn failure_message(&self) -> String {
        self.to_string()
    }
}

/// A raw provider failure described by status and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl FailureSignal for ProviderFailure {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn failure_message(&self) -> String {
        self.message.clone()
    }
}

/// Classify a raw failure into an [`ErrorKind`]
///
/// Order: typed error, then status code, then message substrings.
pub fn classify<F>(raw: &F) -> ErrorKind
where
    F: FailureSignal + ?Sized,
{
    if let Some(typed) = raw.integration_error() {
        return typed.kind();
    }

    if let Some(kind) = raw.status_code().and_then(kind_for_status) {
        return kind;
    }

    kind_for_message(&raw.failure_message())
}

/// Decide whether a failure of `kind` is worth retrying
pub fn is_retryable<F>(kind: ErrorKind, raw: &F) -> bool
where
    F: FailureSignal + ?Sized,
{
    retryable_for(kind, raw.status_code())
}

fn retryable_for(kind: ErrorKind, status: Option<u16>) -> bool {
    match kind {
        ErrorKind::Network
        | ErrorKind::Timeout
        | ErrorKind::ServiceUnavailable
        | ErrorKind::RateLimit => true,
        ErrorKind::Authentication
        | ErrorKind::Authorization
        | ErrorKind::Validation
        | ErrorKind::ResourceNotFound
        | ErrorKind::NotFound
        | ErrorKind::Cancelled => false,
        ErrorKind::Unknown => matches!(status, Some(500..=599)),
    }
}

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::Authentication),
        403 => Some(ErrorKind::Authorization),
        404 => Some(ErrorKind::ResourceNotFound),
        422 => Some(ErrorKind::Validation),
        429 => Some(ErrorKind::RateLimit),
        s if s >= 500 => Some(ErrorKind::ServiceUnavailable),
        _ => None,
    }
}

fn kind_for_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if has(&["network", "connection"]) {
        ErrorKind::Network
    } else if has(&["not found"]) {
        ErrorKind::ResourceNotFound
    } else if has(&["rate limit", "too many requests"]) {
        ErrorKind::RateLimit
    } else if has(&["unauthorized", "unauthenticated"]) {
        ErrorKind::Authentication
    } else {
        ErrorKind::Unknown
    }
}

/// Join an error and its sources into one line
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_error_keeps_kind() {
        let err = IntegrationError::validation("drive", "bad payload").with_status(503);
        assert_eq!(classify(&err), ErrorKind::Validation);
    }

    #[test]
    fn test_classify_by_status() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authorization),
            (404, ErrorKind::ResourceNotFound),
            (422, ErrorKind::Validation),
            (429, ErrorKind::RateLimit),
            (500, ErrorKind::ServiceUnavailable),
            (503, ErrorKind::ServiceUnavailable),
        ];
        for (status, expected) in cases {
            let failure = ProviderFailure::new("boom").with_status(status);
            assert_eq!(classify(&failure), expected, "status {}", status);
        }
    }

    #[test]
    fn test_unmapped_status_falls_through_to_message() {
        let failure = ProviderFailure::new("Connection reset by peer").with_status(400);
        assert_eq!(classify(&failure), ErrorKind::Network);

        let failure = ProviderFailure::new("bad request").with_status(400);
        assert_eq!(classify(&failure), ErrorKind::Unknown);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(classify("Request timed out"), ErrorKind::Timeout);
        assert_eq!(classify("gateway TIMEOUT"), ErrorKind::Timeout);
        assert_eq!(classify("network unreachable"), ErrorKind::Network);
        assert_eq!(classify("File not found"), ErrorKind::ResourceNotFound);
        assert_eq!(classify("Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify("rate limit exceeded"), ErrorKind::RateLimit);
        assert_eq!(classify("Unauthorized"), ErrorKind::Authentication);
        assert_eq!(classify("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn test_timeout_wins_over_connection() {
        assert_eq!(classify("connection timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_retryability_by_kind() {
        let none = ProviderFailure::new("x");
        assert!(is_retryable(ErrorKind::Network, &none));
        assert!(is_retryable(ErrorKind::Timeout, &none));
        assert!(is_retryable(ErrorKind::ServiceUnavailable, &none));
        assert!(is_retryable(ErrorKind::RateLimit, &none));
        assert!(!is_retryable(ErrorKind::Authentication, &none));
        assert!(!is_retryable(ErrorKind::Authorization, &none));
        assert!(!is_retryable(ErrorKind::Validation, &none));
        assert!(!is_retryable(ErrorKind::ResourceNotFound, &none));
        assert!(!is_retryable(ErrorKind::Cancelled, &none));
        assert!(!is_retryable(ErrorKind::Unknown, &none));
    }

    #[test]
    fn test_unknown_retryable_only_for_5xx() {
        let server = ProviderFailure::new("x").with_status(502);
        let client = ProviderFailure::new("x").with_status(418);
        assert!(is_retryable(ErrorKind::Unknown, &server));
        assert!(!is_retryable(ErrorKind::Unknown, &client));

        let err = IntegrationError::unknown("svc", "odd").with_status(500);
        assert!(err.is_retryable());
        let err = IntegrationError::unknown("svc", "odd").with_status(499);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_failure_derives_retryable() {
        let failure = ProviderFailure::new("upstream exploded").with_status(503);
        let err = IntegrationError::from_failure("calendar", &failure);
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.service_name(), "calendar");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_anyhow_downcasts_typed_error() {
        let typed = IntegrationError::authorization("tasks", "forbidden");
        let wrapped = anyhow::Error::new(typed);
        assert_eq!(classify(&wrapped), ErrorKind::Authorization);

        let err = IntegrationError::from_anyhow("tasks", wrapped);
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_anyhow_message_chain_is_classified() {
        let err = anyhow::anyhow!("connection refused").context("fetching page 2");
        let classified = IntegrationError::from_anyhow("files", err);
        assert_eq!(classified.kind(), ErrorKind::Network);
        assert!(std::error::Error::source(&classified).is_some());
    }

    #[test]
    fn test_display_and_serialize() {
        let err = IntegrationError::rate_limited("files", "slow down").with_status(429);
        assert_eq!(err.to_string(), "[rate_limit] files: slow down");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rate_limit");
        assert_eq!(json["status_code"], 429);
        assert_eq!(json["retryable"], true);
    }

    #[test]
    fn test_recommendations() {
        assert_eq!(
            ErrorKind::Authentication.recommendation(),
            "Reconnect the integration"
        );
    }
}
