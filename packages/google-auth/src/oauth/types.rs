// ABOUTME: Core type definitions for Google OAuth credentials
// ABOUTME: Token responses, persisted credential records, service account keys and directory records

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FailureKind, RequestError};

/// Parsed token endpoint response
///
/// `expires_at` is computed when the response is processed, not when the
/// request was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    /// Present only when the provider rotates the refresh token
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<Value>,
}

impl TokenResponse {
    /// Parse a successful token endpoint body, anchoring `expires_in` at `now`.
    pub fn from_body(body: &str, now: DateTime<Utc>) -> Result<Self, RequestError> {
        let raw: RawTokenResponse = serde_json::from_str(body)
            .map_err(|e| RequestError::malformed(format!("Invalid token response: {}", e)))?;

        let access_token = raw
            .access_token
            .ok_or_else(|| RequestError::malformed("Token response is missing access_token"))?;

        let expires_at = match raw.expires_in {
            None | Some(Value::Null) => None,
            Some(value) => {
                let seconds = expires_in_seconds(&value).ok_or_else(|| {
                    RequestError::new(
                        FailureKind::MalformedResponse,
                        format!("Invalid expires_in value: {}", value),
                    )
                })?;
                let expires_at = Duration::try_seconds(seconds)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| RequestError::malformed("expires_in out of range"))?;
                Some(expires_at)
            }
        };

        Ok(Self {
            access_token,
            refresh_token: raw.refresh_token,
            expires_at,
        })
    }
}

fn expires_in_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a stored expiry timestamp.
///
/// Accepts RFC 3339 (`Z` or offset-qualified) and naive ISO-8601, which is
/// assumed to be UTC. Returns `None` for anything else.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Persistence-agnostic user credential record.
///
/// Either `token` or `access_token` may carry the bearer value. Fields this
/// crate does not know about are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialRecord {
    /// The bearer token, preferring `token` over `access_token`; empty strings count as absent
    pub fn bearer(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.as_deref().filter(|t| !t.is_empty()))
    }
}

/// Service account key file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of the userinfo endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified_email: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A Resource Manager project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub lifecycle_state: Option<String>,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state.as_deref() == Some("ACTIVE")
    }

    /// Human-readable name: `displayName`, then `name`, then the project id
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.project_id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectList {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
