// ABOUTME: Rotating pool of named user credentials
// ABOUTME: Rotates after a configured number of calls and disables credentials that can no longer refresh

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::PoolConfig,
    directory::DirectoryClient,
    error::{AuthError, AuthResult, FailureKind, TokenError},
    oauth::{token_client::TokenClient, types::CredentialRecord, user::UserCredential},
    retry::RetryPolicy,
};

const MAX_ERROR_CODES: usize = 10;

/// Health bookkeeping for one pooled credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CredentialState {
    pub disabled: bool,
    /// Distinct failure status codes, most recent last
    pub error_codes: Vec<u16>,
    pub last_success: Option<DateTime<Utc>>,
    pub user_email: Option<String>,
}

#[derive(Debug)]
struct PoolEntry {
    name: String,
    credential: UserCredential,
    state: CredentialState,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    current: usize,
    call_count: usize,
}

impl PoolState {
    fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.state.disabled).count()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// First enabled entry at or after `current`, wrapping around
    fn current_enabled(&self) -> Option<usize> {
        let len = self.entries.len();
        (0..len)
            .map(|offset| (self.current + offset) % len)
            .find(|&i| !self.entries[i].state.disabled)
    }

    /// Move to the next enabled entry after the current one and reset the call count
    fn rotate(&mut self) {
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        if let Some(next) = (1..=len)
            .map(|offset| (self.current + offset) % len)
            .find(|&i| !self.entries[i].state.disabled)
        {
            self.current = next;
        }
        self.call_count = 0;
        debug!("Rotated to credential index {}", self.current);
    }
}

/// Pool of user credentials shared by concurrent request handlers.
///
/// Every operation takes the same async mutex, so refreshes and rotations
/// never interleave.
pub struct CredentialPool {
    tokens: TokenClient,
    directory: DirectoryClient,
    config: PoolConfig,
    retry: RetryPolicy,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(tokens: TokenClient, config: PoolConfig) -> Self {
        Self {
            directory: DirectoryClient::new(tokens.clone()),
            tokens,
            config,
            retry: RetryPolicy::default(),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Retry policy used when refreshing pooled credentials
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Add a credential, replacing any existing one with the same name
    pub async fn add(&self, name: impl Into<String>, credential: UserCredential) {
        let name = name.into();
        let mut state = self.state.lock().await;
        match state.find(&name) {
            Some(index) => {
                let entry = &mut state.entries[index];
                entry.credential = credential;
                entry.state = CredentialState::default();
            }
            None => state.entries.push(PoolEntry {
                name: name.clone(),
                credential,
                state: CredentialState::default(),
            }),
        }
        info!("Added credential {} to pool", name);
    }

    /// Add a credential parsed from a stored record
    pub async fn add_record(&self, name: impl Into<String>, record: &CredentialRecord) -> AuthResult<()> {
        let credential = UserCredential::from_record(record)?;
        self.add(name, credential).await;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Option<UserCredential> {
        let mut state = self.state.lock().await;
        let index = state.find(name)?;
        let entry = state.entries.remove(index);
        if state.current > index || state.current >= state.entries.len() {
            state.current = state.current.saturating_sub(1);
        }
        Some(entry.credential)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Name of the credential that would serve the next call
    pub async fn current_name(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .current_enabled()
            .map(|index| state.entries[index].name.clone())
    }

    /// Return the current credential with a valid token.
    ///
    /// Rotates first once the call budget is spent. A credential that is expired
    /// with no refresh token, or whose refresh fails, is disabled and the next
    /// enabled one is tried.
    pub async fn get_valid_credential(&self) -> Option<(String, UserCredential)> {
        let mut state = self.state.lock().await;

        let enabled = state.enabled_count();
        if enabled == 0 {
            warn!("No enabled credentials in pool");
            return None;
        }

        if enabled > 1 && state.call_count >= self.config.calls_per_rotation {
            state.rotate();
        }

        for attempt in 1..=enabled {
            let index = state.current_enabled()?;
            state.current = index;
            let entry = &mut state.entries[index];

            match self.ensure_valid(entry).await {
                Ok(()) => return Some((entry.name.clone(), entry.credential.clone())),
                Err(reason) => {
                    warn!(
                        "Disabling credential {} ({}/{}): {}",
                        entry.name, attempt, enabled, reason
                    );
                    entry.state.disabled = true;
                    state.rotate();
                }
            }
        }

        error!("All {} credentials failed", enabled);
        None
    }

    async fn ensure_valid(&self, entry: &mut PoolEntry) -> Result<(), String> {
        if !entry.credential.is_expired() {
            return Ok(());
        }
        if !entry.credential.has_refresh_token() {
            return Err("expired with no refresh token".to_string());
        }

        debug!("Refreshing pooled credential {}", entry.name);
        match entry.credential.refresh_with(&self.tokens, &self.retry).await {
            Ok(()) => {
                info!("Refreshed pooled credential {}", entry.name);
                Ok(())
            }
            Err(e) => {
                if let Some(status) = permanent_failure_status(&e) {
                    record_failure(&mut entry.state, status);
                }
                Err(e.to_string())
            }
        }
    }

    /// Count one API call against the current credential
    pub async fn increment_call_count(&self) {
        self.state.lock().await.call_count += 1;
    }

    /// Rotate immediately, e.g. after the current credential was rate limited
    pub async fn force_rotate(&self) {
        let mut state = self.state.lock().await;
        if state.enabled_count() <= 1 {
            warn!("Only one credential available, cannot rotate");
            return;
        }
        state.rotate();
        info!("Forced credential rotation");
    }

    /// Enable or disable a credential by name; returns false for an unknown name
    pub async fn set_disabled(&self, name: &str, disabled: bool) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.find(name) else {
            warn!("Unknown credential {}", name);
            return false;
        };

        state.entries[index].state.disabled = disabled;
        if disabled && state.current == index {
            state.rotate();
        }
        info!(
            "Credential {} {}",
            name,
            if disabled { "disabled" } else { "enabled" }
        );
        true
    }

    /// Record the outcome of an API call made with `name`.
    ///
    /// Success clears the recorded error codes; a failure appends its status
    /// code once, keeping only the most recent ones.
    pub async fn record_api_call_result(&self, name: &str, success: bool, error_code: Option<u16>) {
        let mut state = self.state.lock().await;
        let Some(index) = state.find(name) else {
            warn!("Unknown credential {}", name);
            return;
        };

        let entry_state = &mut state.entries[index].state;
        if success {
            entry_state.last_success = Some(Utc::now());
            entry_state.error_codes.clear();
        } else if let Some(code) = error_code {
            record_failure(entry_state, code);
        }
    }

    pub async fn status(&self) -> BTreeMap<String, CredentialState> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .map(|e| (e.name.clone(), e.state.clone()))
            .collect()
    }

    /// Current credential contents in persistable form
    pub async fn export_record(&self, name: &str) -> Option<CredentialRecord> {
        let state = self.state.lock().await;
        let index = state.find(name)?;
        Some(state.entries[index].credential.to_record())
    }

    /// Email of the account behind `name`, looked up once and cached
    pub async fn user_email(&self, name: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let index = state.find(name)?;
        let entry = &mut state.entries[index];

        if let Some(email) = &entry.state.user_email {
            return Some(email.clone());
        }

        let email = self.directory.fetch_user_email(&mut entry.credential).await?;
        entry.state.user_email = Some(email.clone());
        Some(email)
    }
}

fn record_failure(state: &mut CredentialState, code: u16) {
    if !state.error_codes.contains(&code) {
        state.error_codes.push(code);
        if state.error_codes.len() > MAX_ERROR_CODES {
            let excess = state.error_codes.len() - MAX_ERROR_CODES;
            state.error_codes.drain(..excess);
        }
    }
}

/// A refresh failure that will not heal by retrying is recorded as a 400.
///
/// A bare 401 is not treated as permanent.
fn permanent_failure_status(error: &AuthError) -> Option<u16> {
    let AuthError::Token(TokenError::Refresh { source, .. }) = error else {
        return None;
    };
    match source.failure_kind() {
        Some(FailureKind::Unauthorized) => None,
        Some(kind) if !kind.is_retryable() => Some(400),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refresh_failure(kind: FailureKind) -> AuthError {
        TokenError::Refresh {
            attempts: 1,
            source: Box::new(crate::error::RequestError::new(kind, "refresh failed").into()),
        }
        .into()
    }

    #[test]
    fn test_permanent_failure_status() {
        assert_eq!(
            permanent_failure_status(&refresh_failure(FailureKind::InvalidGrant)),
            Some(400)
        );
        assert_eq!(
            permanent_failure_status(&refresh_failure(FailureKind::BadRequest)),
            Some(400)
        );
        assert_eq!(
            permanent_failure_status(&refresh_failure(FailureKind::Unauthorized)),
            None
        );
        assert_eq!(
            permanent_failure_status(&refresh_failure(FailureKind::HttpStatus(500))),
            None
        );
    }

    #[test]
    fn test_record_failure_dedups_and_caps() {
        let mut state = CredentialState::default();
        record_failure(&mut state, 429);
        record_failure(&mut state, 429);
        assert_eq!(state.error_codes, vec![429]);

        for code in 500..512 {
            record_failure(&mut state, code);
        }
        assert_eq!(state.error_codes.len(), MAX_ERROR_CODES);
        assert_eq!(state.error_codes.first(), Some(&502));
        assert_eq!(state.error_codes.last(), Some(&511));
    }

    fn entry(name: &str, disabled: bool) -> PoolEntry {
        PoolEntry {
            name: name.to_string(),
            credential: UserCredential::default(),
            state: CredentialState {
                disabled,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rotate_skips_disabled() {
        let mut state = PoolState {
            entries: vec![entry("a", false), entry("b", true), entry("c", false)],
            current: 0,
            call_count: 7,
        };
        state.rotate();
        assert_eq!(state.current, 2);
        assert_eq!(state.call_count, 0);

        state.rotate();
        assert_eq!(state.current, 0);
    }

    #[test]
    fn test_current_enabled_wraps() {
        let state = PoolState {
            entries: vec![entry("a", false), entry("b", true)],
            current: 1,
            call_count: 0,
        };
        assert_eq!(state.current_enabled(), Some(0));
    }
}
