use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    None,
    Timeout,
    ConnectionFailed,
    SslError,
    InvalidUrl,
    InvalidMethod,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::None => "NONE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::SslError => "SSL_ERROR",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::InvalidMethod => "INVALID_METHOD",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Lowercase name used in trace payloads.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            ErrorCode::None => "none",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::SslError => "ssl_error",
            ErrorCode::InvalidUrl => "invalid_url",
            ErrorCode::InvalidMethod => "invalid_method",
            ErrorCode::InternalError => "internal_error",
        }
    }

    /// Stable numeric code, persisted alongside traces.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Timeout => 1,
            ErrorCode::ConnectionFailed => 2,
            ErrorCode::SslError => 3,
            ErrorCode::InvalidUrl => 4,
            ErrorCode::InvalidMethod => 5,
            ErrorCode::InternalError => 6,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure outcome of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransferError {
    pub code: ErrorCode,
    pub message: String,
}

pub(crate) const CANCELLED_MESSAGE: &str = "Request cancelled";

impl TransferError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::internal(CANCELLED_MESSAGE)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::InternalError && self.message == CANCELLED_MESSAGE
    }
}
