// ABOUTME: Endpoint and pool configuration for Google OAuth operations
// ABOUTME: Base URLs are resolved per call through an injectable provider, with env var overrides

use std::{env, fmt};

use async_trait::async_trait;

use crate::error::AuthResult;

// Environment variable names
pub const OAUTH_PROXY_URL: &str = "OAUTH_PROXY_URL";
pub const GOOGLEAPIS_PROXY_URL: &str = "GOOGLEAPIS_PROXY_URL";
pub const RESOURCE_MANAGER_API_URL: &str = "RESOURCE_MANAGER_API_URL";
pub const SERVICE_USAGE_API_URL: &str = "SERVICE_USAGE_API_URL";
pub const CALLS_PER_ROTATION: &str = "CALLS_PER_ROTATION";

const DEFAULT_OAUTH_URL: &str = "https://oauth2.googleapis.com";
const DEFAULT_GOOGLEAPIS_URL: &str = "https://www.googleapis.com";
const DEFAULT_RESOURCE_MANAGER_URL: &str = "https://cloudresourcemanager.googleapis.com";
const DEFAULT_SERVICE_USAGE_URL: &str = "https://serviceusage.googleapis.com";
const DEFAULT_CALLS_PER_ROTATION: usize = 100;

/// Logical endpoints whose base URL may be proxied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Token, tokeninfo
    OAuth,
    /// Userinfo and other generic googleapis.com calls
    GoogleApis,
    ResourceManager,
    ServiceUsage,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OAuth => write!(f, "oauth"),
            Self::GoogleApis => write!(f, "googleapis"),
            Self::ResourceManager => write!(f, "resource-manager"),
            Self::ServiceUsage => write!(f, "service-usage"),
        }
    }
}

/// Resolves the base URL for an endpoint.
///
/// Called on every request, so implementations may change their answer over
/// the lifetime of a credential.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn base_url(&self, endpoint: Endpoint) -> AuthResult<String>;
}

/// Join a base URL and a path, ignoring trailing slashes on the base.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Fixed set of base URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoints {
    pub oauth: String,
    pub googleapis: String,
    pub resource_manager: String,
    pub service_usage: String,
}

impl Default for StaticEndpoints {
    fn default() -> Self {
        Self {
            oauth: DEFAULT_OAUTH_URL.to_string(),
            googleapis: DEFAULT_GOOGLEAPIS_URL.to_string(),
            resource_manager: DEFAULT_RESOURCE_MANAGER_URL.to_string(),
            service_usage: DEFAULT_SERVICE_USAGE_URL.to_string(),
        }
    }
}

impl StaticEndpoints {
    /// Google defaults, with each URL overridable through its environment variable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            oauth: env::var(OAUTH_PROXY_URL).unwrap_or(defaults.oauth),
            googleapis: env::var(GOOGLEAPIS_PROXY_URL).unwrap_or(defaults.googleapis),
            resource_manager: env::var(RESOURCE_MANAGER_API_URL)
                .unwrap_or(defaults.resource_manager),
            service_usage: env::var(SERVICE_USAGE_API_URL).unwrap_or(defaults.service_usage),
        }
    }

    /// Route every endpoint through the same base URL
    pub fn uniform(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            oauth: base.clone(),
            googleapis: base.clone(),
            resource_manager: base.clone(),
            service_usage: base,
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::OAuth => &self.oauth,
            Endpoint::GoogleApis => &self.googleapis,
            Endpoint::ResourceManager => &self.resource_manager,
            Endpoint::ServiceUsage => &self.service_usage,
        }
    }
}

#[async_trait]
impl EndpointProvider for StaticEndpoints {
    async fn base_url(&self, endpoint: Endpoint) -> AuthResult<String> {
        Ok(self.get(endpoint).to_string())
    }
}

/// Credential pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Calls served by one credential before rotating to the next
    pub calls_per_rotation: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            calls_per_rotation: DEFAULT_CALLS_PER_ROTATION,
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let calls_per_rotation = env::var(CALLS_PER_ROTATION)
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CALLS_PER_ROTATION);

        Self { calls_per_rotation }
    }
}
