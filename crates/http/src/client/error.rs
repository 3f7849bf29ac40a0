//! Client error types

use thiserror::Error;

/// Server error code: the refresh cookie was never sent or was cleared
pub const NO_REFRESH_TOKEN: &str = "NO_REFRESH_TOKEN";
/// Server error code: the refresh cookie is past its lifetime
pub const REFRESH_TOKEN_EXPIRED: &str = "REFRESH_TOKEN_EXPIRED";

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Authentication failed (HTTP 401)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { code: Option<String>, message: String },

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response was successful but did not have a recognised shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The session could not be renewed and the user must sign in again
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create error from HTTP status code and response body
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        let code = error_code_from_body(&message);
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed { code, message },
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                code,
                message,
            },
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::ServerError { status, .. } => Some(*status),
            Self::AuthenticationFailed { .. } => Some(401),
            Self::BadRequest(_) => Some(400),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Machine-readable error code reported by the server
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::AuthenticationFailed { code, .. } | Self::ServerError { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// The refresh credential itself is absent or expired; only a new login helps
    pub fn is_refresh_credential_invalid(&self) -> bool {
        matches!(
            self.error_code(),
            Some(NO_REFRESH_TOKEN | REFRESH_TOKEN_EXPIRED)
        )
    }

    /// Network failures and 5xx responses, which may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => {
                e.status().is_none_or(|s| s.is_server_error()) && !e.is_decode() && !e.is_builder()
            }
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Pull an error code out of a JSON error body
///
/// Accepted shapes: `{"code": ..}`, `{"errorCode": ..}`, `{"error": {"code": ..}}`
/// and `{"error": ".."}`.
fn error_code_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["/code", "/errorCode", "/error/code", "/error"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(serde_json::Value::as_str))
        .map(ToString::to_string)
}
