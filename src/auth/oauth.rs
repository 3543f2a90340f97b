//! OAuth token endpoint client
//!
//! Exchanges authorization codes and refresh tokens against a provider's
//! token URL.

use crate::error::{IntegrationError, ProviderFailure};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for token exchanges
const TOKEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Token response from a provider
///
/// Providers report some failures in-band with `error` / `error_description`
/// on a 200 response, so the body is parsed leniently before this is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Authorization-code exchange parameters
#[derive(Debug, Clone)]
pub struct CodeExchange {
    pub service_name: String,
    pub token_url: String,
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Refresh-token exchange parameters
#[derive(Debug, Clone)]
pub struct RefreshExchange {
    pub service_name: String,
    pub token_url: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Provider token endpoint collaborator
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, request: &RefreshExchange) -> Result<TokenResponse>;
}

/// [`TokenEndpoint`] over HTTP form posts
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
}

impl HttpTokenEndpoint {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()
            .map_err(|e| IntegrationError::from_reqwest("oauth", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post_form(
        &self,
        service_name: &str,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        debug!(service = service_name, url = token_url, "Requesting OAuth token");

        let response = self
            .client
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(service_name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let failure = ProviderFailure::new(format!(
                "Token endpoint returned HTTP {}: {}",
                status, body
            ))
            .with_status(status.as_u16());
            return Err(IntegrationError::from_failure(service_name, &failure));
        }

        let raw: RawTokenResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::from_reqwest(service_name, e))?;

        if let Some(error) = raw.error {
            let description = raw.error_description.unwrap_or_default();
            return Err(IntegrationError::authentication(
                service_name,
                format!("OAuth error: {} {}", error, description).trim_end().to_string(),
            ));
        }

        let access_token = raw.access_token.ok_or_else(|| {
            IntegrationError::authentication(service_name, "No access token in response")
        })?;

        Ok(TokenResponse {
            access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
            scope: raw.scope,
            token_type: raw.token_type,
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse> {
        self.post_form(
            &request.service_name,
            &request.token_url,
            &[
                ("grant_type", "authorization_code"),
                ("code", request.code.as_str()),
                ("redirect_uri", request.redirect_uri.as_str()),
                ("client_id", request.client_id.as_str()),
                ("client_secret", request.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn refresh(&self, request: &RefreshExchange) -> Result<TokenResponse> {
        self.post_form(
            &request.service_name,
            &request.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", request.refresh_token.as_str()),
                ("client_id", request.client_id.as_str()),
                ("client_secret", request.client_secret.as_str()),
            ],
        )
        .await
    }
}
