// ABOUTME: OAuth credential variants and the token endpoint client
// ABOUTME: Exposes a common trait for obtaining a usable bearer token from any credential

pub mod flow;
pub mod provider;
pub mod server;
pub mod service_account;
pub mod token_client;
pub mod types;
pub mod user;

use async_trait::async_trait;

pub use flow::AuthorizationFlow;
pub use server::{CallbackParams, CallbackServer};
pub use service_account::{AssertionClaims, ServiceAccountCredential};
pub use token_client::{classify_error_response, TokenClient};
pub use types::{CredentialRecord, Project, ServiceAccountKey, TokenResponse, UserInfo};
pub use user::UserCredential;

use crate::error::{AuthError, AuthResult, TokenError};

/// Anything that can produce a currently valid bearer token.
#[async_trait]
pub trait Credential: Send {
    /// Return a token that is outside the expiry buffer, refreshing or
    /// re-exchanging first when needed.
    async fn valid_token(&mut self, client: &TokenClient) -> AuthResult<String>;
}

#[async_trait]
impl Credential for UserCredential {
    async fn valid_token(&mut self, client: &TokenClient) -> AuthResult<String> {
        self.refresh_if_needed(client).await?;
        self.access_token
            .clone()
            .ok_or(AuthError::MissingField("access_token"))
    }
}

#[async_trait]
impl Credential for ServiceAccountCredential {
    async fn valid_token(&mut self, client: &TokenClient) -> AuthResult<String> {
        self.get_access_token(client).await
    }
}

#[async_trait]
impl Credential for AuthorizationFlow {
    async fn valid_token(&mut self, client: &TokenClient) -> AuthResult<String> {
        match self.credential_mut() {
            Some(credential) => credential.valid_token(client).await,
            None => Err(TokenError::NotAuthorized.into()),
        }
    }
}
