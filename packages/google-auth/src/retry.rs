// ABOUTME: Exponential backoff retry driver for token endpoint requests
// ABOUTME: Aborts immediately on errors classified as non-retryable (revoked or invalid grants)

use std::{future::Future, time::Duration};

use tracing::{debug, error, warn};

use crate::error::{AuthError, AuthResult, TokenError};

/// Decides whether a failed attempt is worth retrying.
pub type Classifier = fn(&AuthError) -> bool;

/// Default classifier: retry everything except the non-retryable failure kinds.
pub fn default_classifier(error: &AuthError) -> bool {
    error.is_retryable()
}

/// Retry policy with pure exponential backoff (no jitter).
///
/// An operation is attempted at most `max_retries + 1` times. Before retry `n`
/// (0-based) the calling task sleeps `base_delay * 2^n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            classifier: default_classifier,
        }
    }

    /// Replace the retryable/non-retryable classifier
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds, fails non-retryably, or runs out of attempts.
    ///
    /// Every failure is surfaced as [`TokenError::Refresh`] wrapping the last error.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, TokenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Token request succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let attempts = attempt + 1;

                    if !(self.classifier)(&e) {
                        error!("Token request hit a non-retryable error: {}", e);
                        return Err(TokenError::Refresh {
                            attempts,
                            source: Box::new(e),
                        });
                    }

                    if attempt >= self.max_retries {
                        error!(
                            "Token request failed after {} retries: {}",
                            self.max_retries, e
                        );
                        return Err(TokenError::Refresh {
                            attempts,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "Token request failed (attempt {}): {}, retrying in {:?}",
                        attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
