/// Error types for shelfmark request execution
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not signed in: no access token is stored")]
    NotSignedIn,

    #[error("HTTP {code} from {locator}: {message}")]
    Http {
        code: u16,
        message: String,
        locator: Url,
        body: String,
        trace_id: Option<String>,
    },

    #[error("Transport failure for {locator} after {attempts} attempt(s): {source}")]
    Transport {
        locator: Url,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to decode response from {locator}: {message}")]
    Decode { locator: Url, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Failed to encode request body: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// HTTP status code, if the server answered with a failure status
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Whether the server rejected the bearer token as expired.
    ///
    /// Only 401 responses qualify; the body is searched for an expiry hint
    /// because the service does not use a dedicated error code for it.
    pub fn is_token_expired(&self) -> bool {
        match self {
            ApiError::Http {
                code: 401,
                message,
                body,
                ..
            } => mentions_expiry(message) || mentions_expiry(body),
            _ => false,
        }
    }
}

pub(crate) fn mentions_expiry(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("expired") || lowered.contains("invalid_token")
}

/// Failure reported by a body codec
///
/// `Io` means the byte stream itself broke (a transport fault or a
/// cancellation), `Malformed` means the bytes arrived but did not match
/// the expected shape.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            CodecError::Io(err.into())
        } else {
            CodecError::Malformed(err.to_string())
        }
    }
}

/// Marker carried inside the `io::Error` raised by a cancelled read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transfer cancelled")
    }
}

impl std::error::Error for Cancelled {}

impl Cancelled {
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, self)
    }

    /// Whether `err` was raised by a cancelled read
    pub fn is(err: &std::io::Error) -> bool {
        err.get_ref()
            .map(|inner| inner.is::<Cancelled>())
            .unwrap_or(false)
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
