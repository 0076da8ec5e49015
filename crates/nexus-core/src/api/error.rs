use serde_json::Value;
use thiserror::Error;

/// Message carried by [`ApiError::SessionExpired`].
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-success response; `message` is the backend's detail text when present
    #[error("{message}")]
    Http { status: u16, message: String },

    /// A 401 survived one refresh and retry; the session has been ended
    #[error("{}", SESSION_EXPIRED_MESSAGE)]
    SessionExpired,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an error from a failed response's status and raw body.
    ///
    /// The backend reports failures as `{"detail": "..."}` or, for validation
    /// errors, `{"detail": [{"msg": "...", ...}, ...]}`. Anything else falls
    /// back to a generic status message.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = detail_message(body)
            .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// HTTP status for errors that came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(401),
            ApiError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

fn detail_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items
            .first()
            .and_then(|item| item.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
