//! Error types for session operations

/// Errors from session, token and API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Bad username/password. The message is safe to show to the user.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Terminal refresh failure; the session has been cleared.
    #[error("session expired, please sign in again")]
    SessionExpired,

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("profile belongs to {cached}, refusing to replace it with {incoming}")]
    IdentityChanged { cached: String, incoming: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same call could succeed (connect failures,
    /// timeouts, gateway errors). Credential and parse errors never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_decode() {
            Error::InvalidResponse(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<common::Error> for Error {
    fn from(e: common::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
