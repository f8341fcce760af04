// ABOUTME: Google OAuth provider constants
// ABOUTME: Authorization endpoint, grant types, default scopes and the APIs enabled for new projects

/// Interactive consent page; never proxied
pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed service account assertion
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

pub const USER_AGENT: &str = "geminicli-oauth/1.0";

/// Scopes requested by the interactive flow unless the caller overrides them
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Services that must be enabled on a project before Gemini calls succeed
pub const REQUIRED_SERVICES: &[&str] = &[
    // Gemini Cloud Assist API
    "geminicloudassist.googleapis.com",
    // Gemini for Google Cloud API
    "cloudaicompanion.googleapis.com",
];

/// Default scopes as owned strings
pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}
