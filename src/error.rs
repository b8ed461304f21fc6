//! Error types for the companion runtime.
//!
//! Every external call is converted at its boundary into one of the kinds
//! below. Callers match on the kind (or on [`BotError::code()`]) instead of
//! inspecting messages.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Missing permission on the platform side; never retried.
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";

    /// Rate limit, network blip or server-side failure.
    pub const TRANSIENT: &str = "TRANSIENT";

    /// Malformed prompt, argument or request.
    pub const INVALID_INPUT: &str = "INVALID_INPUT";

    /// The referenced resource does not exist (any more).
    pub const NOT_FOUND: &str = "NOT_FOUND";

    /// A bounded wait expired.
    pub const TIMEOUT: &str = "TIMEOUT";

    /// Invalid configuration detected at startup.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Local I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the companion runtime.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Permanent permission failure (HTTP 401/403).
    #[error("[{}] {}", error_codes::PERMISSION_DENIED, .0)]
    PermissionDenied(String),

    /// Retry-later failure (HTTP 429/5xx, dropped connection, service error).
    #[error("[{}] {}", error_codes::TRANSIENT, .0)]
    Transient(String),

    /// Malformed input (HTTP 400, empty prompt, bad argument).
    #[error("[{}] {}", error_codes::INVALID_INPUT, .0)]
    InvalidInput(String),

    /// Resource disappeared or was never reachable (HTTP 404).
    #[error("[{}] {}", error_codes::NOT_FOUND, .0)]
    NotFound(String),

    /// Bounded wait expired.
    #[error("[{}] {}", error_codes::TIMEOUT, .0)]
    Timeout(String),

    /// Configuration error.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => error_codes::PERMISSION_DENIED,
            Self::Transient(_) => error_codes::TRANSIENT,
            Self::InvalidInput(_) => error_codes::INVALID_INPUT,
            Self::NotFound(_) => error_codes::NOT_FOUND,
            Self::Timeout(_) => error_codes::TIMEOUT,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns true when a later attempt (next sweep, next event) may succeed.
    ///
    /// Permission and input failures are permanent for the operation that
    /// produced them. Missing resources are re-resolved on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout(_) | Self::NotFound(_)
        )
    }

    /// Classify an HTTP status returned by a remote API.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            format!("{context} failed ({status})")
        } else {
            format!("{context} failed ({status}): {}", truncate(body.trim(), 300))
        };
        match status {
            401 | 403 => Self::PermissionDenied(detail),
            404 => Self::NotFound(detail),
            400 | 413 | 422 => Self::InvalidInput(detail),
            _ => Self::Transient(detail),
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), "request", &err.to_string());
        }
        if err.is_decode() {
            return Self::Transient(format!("malformed response: {err}"));
        }
        Self::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transient(format!("malformed payload: {err}"))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_owned(),
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert!(matches!(
            BotError::from_status(403, "rename", ""),
            BotError::PermissionDenied(_)
        ));
        assert!(matches!(
            BotError::from_status(401, "rename", ""),
            BotError::PermissionDenied(_)
        ));
        assert!(matches!(
            BotError::from_status(404, "fetch", ""),
            BotError::NotFound(_)
        ));
        assert!(matches!(
            BotError::from_status(429, "rename", "slow down"),
            BotError::Transient(_)
        ));
        assert!(matches!(
            BotError::from_status(502, "rename", ""),
            BotError::Transient(_)
        ));
        assert!(matches!(
            BotError::from_status(400, "send", ""),
            BotError::InvalidInput(_)
        ));
    }

    #[test]
    fn retryable_kinds() {
        assert!(BotError::Transient("x".into()).is_retryable());
        assert!(BotError::Timeout("x".into()).is_retryable());
        assert!(BotError::NotFound("x".into()).is_retryable());
        assert!(!BotError::PermissionDenied("x".into()).is_retryable());
        assert!(!BotError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn display_includes_code_prefix() {
        let err = BotError::PermissionDenied("missing manage_channels".into());
        assert_eq!(err.code(), error_codes::PERMISSION_DENIED);
        assert_eq!(
            err.to_string(),
            "[PERMISSION_DENIED] missing manage_channels"
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = BotError::from_status(500, "send", &body);
        assert!(err.to_string().len() < 400);
    }
}
