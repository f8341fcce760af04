// ABOUTME: Expiry checks shared by every credential type
// ABOUTME: Tokens are treated as expired three minutes ahead of their real expiry

use chrono::{DateTime, Duration, Utc};

/// Safety margin subtracted from a token's expiry, in seconds.
pub const EXPIRY_BUFFER_SECS: i64 = 180;

/// Safety margin subtracted from a token's expiry.
pub fn expiry_buffer() -> Duration {
    Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// Check whether a token expiring at `expires_at` should no longer be used.
///
/// An absent expiry always counts as expired so that a refresh happens before first use.
pub fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    is_expired_at(expires_at, Utc::now())
}

/// Same as [`is_expired`], evaluated against an explicit clock reading.
pub fn is_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - expiry_buffer() <= now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_expiry_is_expired() {
        assert!(is_expired(None));
    }

    #[test]
    fn test_past_expiry_is_expired() {
        assert!(is_expired(Some(Utc::now() - Duration::minutes(1))));
    }

    #[test]
    fn test_within_buffer_is_expired() {
        assert!(is_expired(Some(Utc::now() + Duration::minutes(2))));
    }

    #[test]
    fn test_buffer_edge_is_expired() {
        // <= comparison: exactly three minutes out is already expired
        let now = Utc::now();
        assert!(is_expired_at(Some(now + expiry_buffer()), now));
    }

    #[test]
    fn test_just_outside_buffer_is_valid() {
        let now = Utc::now();
        let expires_at = now + expiry_buffer() + Duration::seconds(1);
        assert!(!is_expired_at(Some(expires_at), now));
    }

    #[test]
    fn test_far_future_is_valid() {
        assert!(!is_expired(Some(Utc::now() + Duration::hours(1))));
    }

    #[test]
    fn test_buffer_is_three_minutes() {
        assert_eq!(expiry_buffer(), Duration::minutes(3));
    }
}
