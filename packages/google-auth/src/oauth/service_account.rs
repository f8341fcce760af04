// ABOUTME: Service account credential using the JWT-bearer grant
// ABOUTME: Signs a one-hour RS256 assertion per exchange and caches the resulting access token

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    error::{AuthError, AuthResult, TokenError},
    oauth::{
        provider::ASSERTION_LIFETIME_SECS,
        token_client::TokenClient,
        types::ServiceAccountKey,
    },
    time_guard,
};

/// Claims of the signed assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Service account credential.
///
/// Has no refresh token: every exchange signs a fresh assertion with the
/// account's private key.
#[derive(Clone)]
pub struct ServiceAccountCredential {
    pub email: String,
    pub project_id: Option<String>,
    pub scopes: Vec<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    signing_key: EncodingKey,
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("email", &self.email)
            .field("project_id", &self.project_id)
            .field("scopes", &self.scopes)
            .field("has_access_token", &self.access_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountCredential {
    /// Create a credential from an RS256 private key in PEM form
    pub fn new(
        email: impl Into<String>,
        private_key_pem: &str,
        project_id: Option<String>,
        scopes: Vec<String>,
    ) -> AuthResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
        Ok(Self {
            email: email.into(),
            project_id,
            scopes,
            access_token: None,
            expires_at: None,
            signing_key,
        })
    }

    /// Create a credential from a key file record; scopes are supplied by the caller
    pub fn from_key(key: &ServiceAccountKey, scopes: Vec<String>) -> AuthResult<Self> {
        let email = key
            .client_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::MissingField("client_email"))?;
        let private_key = key
            .private_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingField("private_key"))?;

        Self::new(email, private_key, key.project_id.clone(), scopes)
    }

    /// Expired when nothing is cached yet or the cached token is inside the expiry buffer
    pub fn is_expired(&self) -> bool {
        self.access_token.is_none() || time_guard::is_expired(self.expires_at)
    }

    /// Sign an assertion for the token endpoint at `audience`
    pub fn create_assertion(&self, audience: &str) -> AuthResult<String> {
        self.create_assertion_at(audience, Utc::now())
    }

    pub fn create_assertion_at(&self, audience: &str, now: DateTime<Utc>) -> AuthResult<String> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: self.email.clone(),
            scope: self.scopes.join(" "),
            aud: audience.to_string(),
            iat,
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };

        let header = Header::new(Algorithm::RS256);
        Ok(jsonwebtoken::encode(&header, &claims, &self.signing_key)?)
    }

    /// Return the cached token, or exchange a fresh assertion for a new one (single attempt).
    pub async fn get_access_token(&mut self, client: &TokenClient) -> AuthResult<String> {
        if !self.is_expired() {
            if let Some(token) = &self.access_token {
                return Ok(token.clone());
            }
        }

        match self.exchange(client).await {
            Ok(token) => Ok(token),
            Err(e) => {
                error!("Service account token request failed for {}: {}", self.email, e);
                Err(TokenError::Exchange {
                    grant: "jwt-bearer",
                    source: Box::new(e),
                }
                .into())
            }
        }
    }

    async fn exchange(&mut self, client: &TokenClient) -> AuthResult<String> {
        // Resolve once so the signed audience matches the URL actually called
        let token_url = client.token_url().await?;
        let assertion = self.create_assertion(&token_url)?;
        let response = client.exchange_jwt_bearer(&token_url, &assertion).await?;

        if let Some(expires_at) = response.expires_at {
            self.expires_at = Some(expires_at);
        }
        self.access_token = Some(response.access_token.clone());
        debug!(
            "Service account {} obtained token, expires at {:?}",
            self.email, self.expires_at
        );

        Ok(response.access_token)
    }
}
