//! Error types for ConnectedDrive client operations

use thiserror::Error;

/// Result type alias for ConnectedDrive client operations
pub type Result<T> = std::result::Result<T, CdApiError>;

/// Maximum number of characters of a response body kept in an error
const BODY_EXCERPT_CHARS: usize = 200;

/// Errors that can occur during ConnectedDrive client operations
#[derive(Error, Debug)]
pub enum CdApiError {
    /// The credential exchange failed or answered with an unexpected status
    #[error("Authentication failed{}: {message}", http_suffix(.status))]
    AuthenticationFailed {
        status: Option<u16>,
        message: String,
    },

    /// The redirect location did not carry the expected token fields
    #[error("Malformed authentication response: {0}")]
    AuthResponseMalformed(String),

    /// A data endpoint returned a non-2xx status
    #[error("Remote API error {status}: {body}")]
    RemoteApiError { status: u16, body: String },

    /// The decoded body did not contain the requested sub-field
    #[error("Unexpected response envelope: missing or invalid `{field}`")]
    UnexpectedEnvelopeShape { field: String },

    /// Remote service name not in the supported set
    #[error("Unknown remote service: {0}")]
    UnknownService(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl CdApiError {
    /// Create a remote API error, truncating the body to a short excerpt
    pub fn remote(status: u16, body: &str) -> Self {
        Self::RemoteApiError {
            status,
            body: excerpt(body),
        }
    }

    /// Create an authentication failure
    pub fn auth_failed(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            status,
            message: message.into(),
        }
    }

    /// Create an envelope shape error for the given field
    pub fn envelope(field: impl Into<String>) -> Self {
        Self::UnexpectedEnvelopeShape {
            field: field.into(),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::AuthenticationFailed { status, .. } => *status,
            Self::RemoteApiError { status, .. } => Some(*status),
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error came out of the credential exchange
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::AuthResponseMalformed(_)
        )
    }
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Truncate a body to at most [`BODY_EXCERPT_CHARS`] characters
fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_truncates_body() {
        let body = "x".repeat(500);
        match CdApiError::remote(500, &body) {
            CdApiError::RemoteApiError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), BODY_EXCERPT_CHARS + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let body = "ä".repeat(300);
        let cut = excerpt(&body);
        assert_eq!(cut.chars().count(), BODY_EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_short_body_kept() {
        assert_eq!(excerpt("  Unauthorized \n"), "Unauthorized");
    }

    #[test]
    fn test_status_code() {
        assert_eq!(CdApiError::remote(401, "").status_code(), Some(401));
        assert_eq!(CdApiError::auth_failed(None, "x").status_code(), None);
        assert_eq!(CdApiError::envelope("dealer").status_code(), None);
    }

    #[test]
    fn test_auth_error_display() {
        let err = CdApiError::auth_failed(Some(200), "expected a redirect");
        assert_eq!(
            err.to_string(),
            "Authentication failed (HTTP 200): expected a redirect"
        );
        assert!(err.is_auth_error());
        assert!(!CdApiError::UnknownService("x".into()).is_auth_error());
    }
}
