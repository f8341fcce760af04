// ABOUTME: Error types for Google OAuth credential operations
// ABOUTME: Classifies token endpoint failures so retry logic can match on kind instead of text

use std::fmt;

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Machine-readable classification of a failed token or API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// HTTP 400 without a more specific OAuth error code
    BadRequest,
    /// HTTP 401 without a more specific OAuth error code
    Unauthorized,
    InvalidGrant,
    RefreshTokenExpired,
    InvalidRefreshToken,
    UnauthorizedClient,
    AccessDenied,
    /// Any other non-2xx status
    HttpStatus(u16),
    /// The request never produced a response
    Network,
    /// The response body could not be understood
    MalformedResponse,
}

impl FailureKind {
    /// Map an OAuth `error` code from a response body to a kind.
    ///
    /// Only codes that mean the grant itself is unusable are recognised; anything
    /// else falls back to the status-derived kind.
    pub fn from_oauth_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "invalid_grant" => Some(Self::InvalidGrant),
            "refresh_token_expired" => Some(Self::RefreshTokenExpired),
            "invalid_refresh_token" => Some(Self::InvalidRefreshToken),
            "unauthorized_client" => Some(Self::UnauthorizedClient),
            "access_denied" => Some(Self::AccessDenied),
            _ => None,
        }
    }

    /// Map a non-success HTTP status to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            other => Self::HttpStatus(other),
        }
    }

    /// Whether retrying a request that failed this way can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::BadRequest
                | Self::Unauthorized
                | Self::InvalidGrant
                | Self::RefreshTokenExpired
                | Self::InvalidRefreshToken
                | Self::UnauthorizedClient
                | Self::AccessDenied
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "400 Bad Request"),
            Self::Unauthorized => write!(f, "401 Unauthorized"),
            Self::InvalidGrant => write!(f, "invalid_grant"),
            Self::RefreshTokenExpired => write!(f, "refresh_token_expired"),
            Self::InvalidRefreshToken => write!(f, "invalid_refresh_token"),
            Self::UnauthorizedClient => write!(f, "unauthorized_client"),
            Self::AccessDenied => write!(f, "access_denied"),
            Self::HttpStatus(status) => write!(f, "HTTP {}", status),
            Self::Network => write!(f, "network failure"),
            Self::MalformedResponse => write!(f, "malformed response"),
        }
    }
}

/// A failed request, tagged with its classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, message)
    }
}

/// Terminal token failures: the caller has to re-authenticate or supply new credentials.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Refresh token required but absent")]
    MissingRefreshToken,

    #[error("Token refresh failed after {attempts} attempt(s): {source}")]
    Refresh {
        attempts: u32,
        #[source]
        source: Box<AuthError>,
    },

    #[error("Token exchange ({grant}) failed: {source}")]
    Exchange {
        grant: &'static str,
        #[source]
        source: Box<AuthError>,
    },

    #[error("No authorization code has been exchanged yet")]
    NotAuthorized,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("JWT signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("State mismatch: CSRF protection failed")]
    StateMismatch,

    #[error("Callback server error: {0}")]
    Callback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// The request classification, if this error came from the transport layer.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Request(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Only request failures carrying a non-retryable kind abort a retry loop.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_none_or(|kind| kind.is_retryable())
    }

    /// Whether this is a terminal token failure.
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::Token(_))
    }
}
