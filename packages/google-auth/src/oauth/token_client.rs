// ABOUTME: Token endpoint client for the three supported OAuth grant types
// ABOUTME: Sends form-encoded POSTs to {oauth base}/token and classifies failures by kind

use std::sync::Arc;

use chrono::Utc;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error};

use crate::{
    config::{join_url, Endpoint, EndpointProvider},
    error::{AuthResult, FailureKind, RequestError},
    oauth::{
        provider::{GRANT_AUTHORIZATION_CODE, GRANT_JWT_BEARER, GRANT_REFRESH_TOKEN},
        types::TokenResponse,
    },
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client for the OAuth token endpoint.
///
/// Cheap to clone; the HTTP connection pool and endpoint provider are shared.
#[derive(Clone)]
pub struct TokenClient {
    http: Client,
    endpoints: Arc<dyn EndpointProvider>,
}

impl TokenClient {
    pub fn new(endpoints: Arc<dyn EndpointProvider>) -> Self {
        Self::with_http_client(Client::new(), endpoints)
    }

    pub fn with_http_client(http: Client, endpoints: Arc<dyn EndpointProvider>) -> Self {
        Self { http, endpoints }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn endpoints(&self) -> &Arc<dyn EndpointProvider> {
        &self.endpoints
    }

    /// Resolve the current base URL of `endpoint`
    pub async fn base_url(&self, endpoint: Endpoint) -> AuthResult<String> {
        self.endpoints.base_url(endpoint).await
    }

    /// Resolve the token endpoint URL
    pub async fn token_url(&self) -> AuthResult<String> {
        let base = self.base_url(Endpoint::OAuth).await?;
        Ok(join_url(&base, "token"))
    }

    /// Exchange an authorization code (single attempt)
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> AuthResult<TokenResponse> {
        let url = self.token_url().await?;
        self.post_form(
            &url,
            &[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
                ("code", code),
                ("grant_type", GRANT_AUTHORIZATION_CODE),
            ],
        )
        .await
    }

    /// Exchange a refresh token for a new access token (single attempt)
    pub async fn exchange_refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        let url = self.token_url().await?;
        self.post_form(
            &url,
            &[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", GRANT_REFRESH_TOKEN),
            ],
        )
        .await
    }

    /// Exchange a signed JWT assertion at `token_url`.
    ///
    /// The URL is passed in rather than resolved here so that it is the same
    /// one the assertion's audience was signed for.
    pub async fn exchange_jwt_bearer(
        &self,
        token_url: &str,
        assertion: &str,
    ) -> AuthResult<TokenResponse> {
        self.post_form(
            token_url,
            &[("grant_type", GRANT_JWT_BEARER), ("assertion", assertion)],
        )
        .await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let grant = form
            .iter()
            .find(|(key, _)| *key == "grant_type")
            .map(|(_, value)| *value)
            .unwrap_or_default();
        debug!("Requesting token ({}) from {}", grant, url);

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .form(form)
            .send()
            .await
            .map_err(|e| RequestError::network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Don't leak the response body - only the status and OAuth error code
            error!("Token request failed with status {}", status);
            return Err(classify_error_response(status, &body).into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| RequestError::network(format!("Failed to read token response: {}", e)))?;

        Ok(TokenResponse::from_body(&body, Utc::now())?)
    }
}

/// Build a [`RequestError`] for a non-success response.
///
/// An OAuth `error` code in the body takes precedence over the status code.
pub fn classify_error_response(status: StatusCode, body: &str) -> RequestError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str);
    let description = parsed
        .as_ref()
        .and_then(|v| v.get("error_description"))
        .and_then(Value::as_str);

    let kind = code
        .and_then(FailureKind::from_oauth_code)
        .unwrap_or_else(|| FailureKind::from_status(status.as_u16()));

    let mut message = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
    );
    if let Some(code) = code {
        message.push_str(&format!(" ({})", code));
    }
    if let Some(description) = description {
        message.push_str(&format!(": {}", description));
    }

    RequestError::new(kind, message)
}
