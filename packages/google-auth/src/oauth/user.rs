// ABOUTME: Refresh-token based user credential
// ABOUTME: Checks expiry, refreshes through the retry policy, and maps to and from stored records

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    error::{AuthError, AuthResult, TokenError},
    oauth::{
        token_client::TokenClient,
        types::{parse_expiry, CredentialRecord, TokenResponse},
    },
    retry::RetryPolicy,
    time_guard,
};

/// OAuth credential of an interactive user.
///
/// Refreshing mutates the credential in place; persisting it afterwards is up
/// to the caller (see [`UserCredential::to_record`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    /// Record fields this crate does not interpret, written back by `to_record`
    pub extra: Map<String, Value>,
}

impl UserCredential {
    /// Build a credential from a fresh token endpoint response
    pub fn from_token_response(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        response: TokenResponse,
    ) -> Self {
        Self {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token,
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            expires_at: response.expires_at,
            ..Default::default()
        }
    }

    pub fn is_expired(&self) -> bool {
        time_guard::is_expired(self.expires_at)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Refresh the access token if it is expired.
    ///
    /// Returns whether a refresh happened.
    pub async fn refresh_if_needed(&mut self, client: &TokenClient) -> AuthResult<bool> {
        if !self.is_expired() {
            return Ok(false);
        }

        if !self.has_refresh_token() {
            return Err(TokenError::MissingRefreshToken.into());
        }

        self.refresh(client).await?;
        Ok(true)
    }

    /// Refresh with the default retry policy (3 retries, 1s base delay)
    pub async fn refresh(&mut self, client: &TokenClient) -> AuthResult<()> {
        self.refresh_with(client, &RetryPolicy::default()).await
    }

    /// Refresh the access token, retrying transient failures per `policy`.
    ///
    /// The credential is only modified once a response has been accepted.
    pub async fn refresh_with(&mut self, client: &TokenClient, policy: &RetryPolicy) -> AuthResult<()> {
        let refresh_token = self
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingRefreshToken)?;
        let client_id = self
            .client_id
            .clone()
            .ok_or(AuthError::MissingField("client_id"))?;
        let client_secret = self
            .client_secret
            .clone()
            .ok_or(AuthError::MissingField("client_secret"))?;

        let response = policy
            .execute(|| client.exchange_refresh_token(&client_id, &client_secret, &refresh_token))
            .await?;

        self.apply_token_response(response);
        debug!("Token refreshed, expires at {:?}", self.expires_at);
        Ok(())
    }

    /// Store a token response; keeps the existing refresh token and expiry when
    /// the provider did not send new ones.
    pub fn apply_token_response(&mut self, response: TokenResponse) {
        self.access_token = Some(response.access_token);
        if let Some(expires_at) = response.expires_at {
            self.expires_at = Some(expires_at);
        }
        if let Some(refresh_token) = response.refresh_token {
            info!("Provider rotated the refresh token");
            self.refresh_token = Some(refresh_token);
        }
    }

    /// Construct from a stored record.
    ///
    /// A malformed expiry is logged and treated as absent.
    pub fn from_record(record: &CredentialRecord) -> AuthResult<Self> {
        let access_token = record.bearer().map(str::to_string);
        let refresh_token = non_empty(&record.refresh_token);

        if access_token.is_none() && refresh_token.is_none() {
            return Err(AuthError::MissingField("access_token"));
        }

        let client_id = non_empty(&record.client_id);
        let client_secret = non_empty(&record.client_secret);
        if refresh_token.is_some() {
            if client_id.is_none() {
                return Err(AuthError::MissingField("client_id"));
            }
            if client_secret.is_none() {
                return Err(AuthError::MissingField("client_secret"));
            }
        }

        let expires_at = match record.expiry.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = parse_expiry(raw);
                if parsed.is_none() {
                    warn!("Could not parse credential expiry: {}", raw);
                }
                parsed
            }
        };

        Ok(Self {
            access_token,
            refresh_token,
            client_id,
            client_secret,
            expires_at,
            project_id: non_empty(&record.project_id),
            extra: record.extra.clone(),
        })
    }

    /// Inverse of [`UserCredential::from_record`]
    pub fn to_record(&self) -> CredentialRecord {
        CredentialRecord {
            token: None,
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            expiry: self
                .expires_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            project_id: self.project_id.clone(),
            extra: self.extra.clone(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}
