// ABOUTME: Authorization-code flow for installed applications
// ABOUTME: Builds the consent URL, exchanges the returned code, and drives the browser round trip

use tracing::{error, info, warn};
use url::Url;

use crate::{
    error::{AuthError, AuthResult, FailureKind, RequestError, TokenError},
    oauth::{
        provider::{AUTH_ENDPOINT, GRANT_AUTHORIZATION_CODE},
        server::CallbackServer,
        token_client::TokenClient,
        user::UserCredential,
    },
};

/// Authorization-code flow state.
///
/// Holds the client configuration and, once a code has been exchanged, the
/// resulting user credential.
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub auth_endpoint: String,
    credential: Option<UserCredential>,
}

impl AuthorizationFlow {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Vec<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
            redirect_uri: redirect_uri.into(),
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            credential: None,
        }
    }

    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = endpoint.into();
        self
    }

    /// Credential produced by the last successful exchange
    pub fn credential(&self) -> Option<&UserCredential> {
        self.credential.as_ref()
    }

    pub fn credential_mut(&mut self) -> Option<&mut UserCredential> {
        self.credential.as_mut()
    }

    pub fn into_credential(self) -> Option<UserCredential> {
        self.credential
    }

    /// Build the consent URL.
    ///
    /// Always requests offline access with a forced consent prompt so that a
    /// refresh token is issued. `extra_params` override a standard parameter of
    /// the same name, otherwise they are appended.
    pub fn build_authorization_url(
        &self,
        state: Option<&str>,
        extra_params: &[(&str, &str)],
    ) -> AuthResult<String> {
        let scope = self.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
            ("scope", &scope),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }

        for &(key, value) in extra_params {
            match params.iter_mut().find(|(existing, _)| *existing == key) {
                Some(param) => param.1 = value,
                None => params.push((key, value)),
            }
        }

        let mut url = Url::parse(&self.auth_endpoint).map_err(|e| {
            AuthError::Configuration(format!(
                "Invalid authorization endpoint {}: {}",
                self.auth_endpoint, e
            ))
        })?;
        url.query_pairs_mut().extend_pairs(params);

        Ok(url.into())
    }

    /// Exchange an authorization code for tokens (single attempt, no retry).
    ///
    /// On success the credential is stored on the flow and also returned.
    pub async fn exchange_code(
        &mut self,
        client: &TokenClient,
        code: &str,
    ) -> AuthResult<UserCredential> {
        let response = client
            .exchange_authorization_code(
                &self.client_id,
                &self.client_secret,
                &self.redirect_uri,
                code,
            )
            .await
            .map_err(|e| {
                error!("Authorization code exchange failed: {}", e);
                TokenError::Exchange {
                    grant: GRANT_AUTHORIZATION_CODE,
                    source: Box::new(e),
                }
            })?;

        if response.refresh_token.is_none() {
            warn!("Authorization response carried no refresh token");
        }

        let credential = UserCredential::from_token_response(
            self.client_id.clone(),
            self.client_secret.clone(),
            response,
        );
        self.credential = Some(credential.clone());
        info!("Authorization code exchanged successfully");

        Ok(credential)
    }

    /// Run the interactive flow: open the browser, wait for the redirect, exchange the code.
    ///
    /// The flow's redirect URI is replaced by the server's callback URL.
    pub async fn authorize(
        &mut self,
        client: &TokenClient,
        server: CallbackServer,
    ) -> AuthResult<UserCredential> {
        self.authorize_with(client, server, |url| open::that(url))
            .await
    }

    /// Like [`AuthorizationFlow::authorize`], with a custom way of presenting the consent URL
    pub async fn authorize_with<F>(
        &mut self,
        client: &TokenClient,
        server: CallbackServer,
        open_url: F,
    ) -> AuthResult<UserCredential>
    where
        F: FnOnce(&str) -> std::io::Result<()>,
    {
        self.redirect_uri = server.callback_url();

        let state = nanoid::nanoid!();
        let auth_url = self.build_authorization_url(Some(&state), &[])?;

        info!("Opening browser for Google authorization");
        if let Err(e) = open_url(&auth_url) {
            warn!(
                "Failed to open browser: {}. Please visit this URL manually: {}",
                e, auth_url
            );
        }

        let callback = server.wait_for_callback().await?;

        if let Some(provider_error) = callback.error {
            error!("Authorization was rejected: {}", provider_error);
            let kind = FailureKind::from_oauth_code(&provider_error)
                .unwrap_or(FailureKind::BadRequest);
            return Err(TokenError::Exchange {
                grant: GRANT_AUTHORIZATION_CODE,
                source: Box::new(
                    RequestError::new(kind, format!("Authorization rejected: {}", provider_error))
                        .into(),
                ),
            }
            .into());
        }

        if callback.state.as_deref() != Some(state.as_str()) {
            error!("OAuth state mismatch - possible CSRF attack");
            return Err(AuthError::StateMismatch);
        }

        let code = callback
            .code
            .ok_or_else(|| AuthError::Callback("No authorization code in callback".to_string()))?;

        self.exchange_code(client, &code).await
    }
}
