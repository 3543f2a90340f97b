//! Credential types
//!
//! Secret material for one provider, serialized as a JSON object tagged by `kind`.

use super::oauth::TokenResponse;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OAuth tokens are treated as expired this long before `expires_at`
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Longest token lifetime honored from a provider's `expires_in` (one year)
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// Safety buffer applied to every OAuth validity check
pub fn expiry_buffer() -> Duration {
    Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// Expiry instant `expires_in` seconds after `now`
///
/// Provider values are clamped to `0..=MAX_TOKEN_LIFETIME_SECS`; negative
/// lifetimes expire immediately.
pub fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let secs = expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS);
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Credentials for one external service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceCredentials {
    /// Static API key
    ApiKey { api_key: String },

    /// OAuth 2.0 client plus tokens
    #[serde(rename = "oauth")]
    OAuth(OAuthCredentials),

    /// HTTP basic auth
    Basic { username: String, password: String },
}

impl ServiceCredentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        ServiceCredentials::ApiKey {
            api_key: key.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        ServiceCredentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `kind` tag as it appears on the wire
    pub fn kind_name(&self) -> &'static str {
        match self {
            ServiceCredentials::ApiKey { .. } => "api_key",
            ServiceCredentials::OAuth(_) => "oauth",
            ServiceCredentials::Basic { .. } => "basic",
        }
    }

    pub fn as_oauth(&self) -> Option<&OAuthCredentials> {
        match self {
            ServiceCredentials::OAuth(oauth) => Some(oauth),
            _ => None,
        }
    }

    /// Whether these credentials can be used at `now`
    ///
    /// Only OAuth credentials expire; they stop being valid
    /// [`EXPIRY_BUFFER_SECS`] before `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            ServiceCredentials::OAuth(oauth) => !oauth.expires_within_buffer(now),
            _ => true,
        }
    }

    /// Expiry, for credentials that have one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.as_oauth().and_then(|oauth| oauth.expires_at)
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCredentials::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("api_key", &"<redacted>")
                .finish(),
            ServiceCredentials::OAuth(oauth) => f.debug_tuple("OAuth").field(oauth).finish(),
            ServiceCredentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// OAuth client registration and current tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Provider token URL used for refreshes, when not configured per service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl OAuthCredentials {
    /// Build credentials from a fresh token response
    pub fn from_token_response(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        response: TokenResponse,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response.expires_in.map(|secs| expiry_after(now, secs)),
            token_endpoint: None,
            scopes: split_scopes(response.scope.as_deref()),
        }
    }

    /// True when the token is expired or expires inside the safety buffer
    pub fn expires_within_buffer(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - expiry_buffer() < now)
    }

    /// Merge a refresh response into these credentials
    ///
    /// Providers may omit the refresh token on refresh; the old one is kept then.
    pub fn merge_refresh(mut self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        self.access_token = response.access_token;
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        self.expires_at = response.expires_in.map(|secs| expiry_after(now, secs));
        if response.scope.is_some() {
            self.scopes = split_scopes(response.scope.as_deref());
        }
        self
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn split_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .unwrap_or_default()
        .split([',', ' '])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth_expiring_in(seconds: i64, now: DateTime<Utc>) -> ServiceCredentials {
        ServiceCredentials::OAuth(OAuthCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(now + Duration::seconds(seconds)),
            token_endpoint: None,
            scopes: vec![],
        })
    }

    #[test]
    fn test_wire_format_is_tagged_by_kind() {
        let creds = ServiceCredentials::api_key("k-123");
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["kind"], "api_key");
        assert_eq!(json["api_key"], "k-123");

        let parsed: ServiceCredentials = serde_json::from_str(
            r#"{"kind":"oauth","client_id":"c","client_secret":"s","access_token":"a"}"#,
        )
        .unwrap();
        let oauth = parsed.as_oauth().unwrap();
        assert_eq!(oauth.access_token, "a");
        assert!(oauth.refresh_token.is_none());
        assert!(oauth.expires_at.is_none());
    }

    #[test]
    fn test_expiry_buffer() {
        let now = Utc::now();
        assert!(oauth_expiring_in(3600, now).is_valid_at(now));
        assert!(!oauth_expiring_in(4 * 60, now).is_valid_at(now));
        assert!(!oauth_expiring_in(-10, now).is_valid_at(now));
        assert!(ServiceCredentials::basic("u", "p").is_valid_at(now));
    }

    #[test]
    fn test_merge_refresh_keeps_old_refresh_token() {
        let now = Utc::now();
        let ServiceCredentials::OAuth(oauth) = oauth_expiring_in(10, now) else {
            panic!("expected oauth");
        };

        let merged = oauth.merge_refresh(
            TokenResponse {
                access_token: "new-access".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                scope: None,
                token_type: None,
            },
            now,
        );

        assert_eq!(merged.access_token, "new-access");
        assert_eq!(merged.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(merged.expires_at, Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn test_out_of_range_expires_in_is_clamped() {
        let now = Utc::now();
        let response = |expires_in| TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(expires_in),
            scope: None,
            token_type: None,
        };

        let huge = OAuthCredentials::from_token_response("c", "s", response(i64::MAX), now);
        assert_eq!(
            huge.expires_at,
            Some(now + Duration::seconds(MAX_TOKEN_LIFETIME_SECS))
        );

        let negative = OAuthCredentials::from_token_response("c", "s", response(i64::MIN), now);
        assert_eq!(negative.expires_at, Some(now));

        let merged = huge.merge_refresh(response(i64::MAX), now);
        assert_eq!(
            merged.expires_at,
            Some(now + Duration::seconds(MAX_TOKEN_LIFETIME_SECS))
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let now = Utc::now();
        let output = format!("{:?}", oauth_expiring_in(60, now));
        assert!(!output.contains("secret\""));
        assert!(!output.contains("\"access\""));
        assert!(output.contains("<redacted>"));

        let output = format!("{:?}", ServiceCredentials::basic("alice", "hunter2"));
        assert!(output.contains("alice"));
        assert!(!output.contains("hunter2"));
    }

    #[test]
    fn test_scopes_parsed_from_token_response() {
        let now = Utc::now();
        let creds = OAuthCredentials::from_token_response(
            "c",
            "s",
            TokenResponse {
                access_token: "a".to_string(),
                refresh_token: Some("r".to_string()),
                expires_in: Some(60),
                scope: Some("files.read files.write".to_string()),
                token_type: Some("bearer".to_string()),
            },
            now,
        );
        assert_eq!(creds.scopes, vec!["files.read", "files.write"]);
    }
}
