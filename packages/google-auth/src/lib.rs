// ABOUTME: Google OAuth2 credential lifecycle library
// ABOUTME: User, service account and authorization-code credentials with expiry-aware refresh

pub mod config;
pub mod directory;
pub mod error;
pub mod oauth;
pub mod pool;
pub mod retry;
pub mod time_guard;

pub use config::{Endpoint, EndpointProvider, PoolConfig, StaticEndpoints};
pub use directory::{select_default_project, DirectoryClient};
pub use error::{AuthError, AuthResult, FailureKind, RequestError, TokenError};
pub use oauth::{
    AuthorizationFlow, CallbackServer, Credential, CredentialRecord, Project,
    ServiceAccountCredential, ServiceAccountKey, TokenClient, TokenResponse, UserCredential,
    UserInfo,
};
pub use pool::{CredentialPool, CredentialState};
pub use retry::RetryPolicy;
