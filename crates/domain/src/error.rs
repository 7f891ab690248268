use serde::{Deserialize, Serialize};

/// Shared error type used across all Switchboard crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider auth: {0}")]
    ProviderAuth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("context overflow: used {used} of {limit} tokens")]
    ContextOverflow { used: u64, limit: u64 },

    #[error("token extraction failed for turn {turn} in session {session_id}: {message}")]
    TokenExtraction {
        session_id: String,
        turn: u32,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RPC error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of error codes surfaced on the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParams,
    NotFound,
    NotAvailable,
    PermissionDenied,
    Conflict,
    InvalidOperation,
    ProviderAuth,
    ProviderRateLimit,
    ProviderError,
    ContextOverflow,
    ToolResultFailed,
    TokenExtraction,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "INVALID_PARAMS",
            Self::NotFound => "NOT_FOUND",
            Self::NotAvailable => "NOT_AVAILABLE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Conflict => "CONFLICT",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::ProviderAuth => "PROVIDER_AUTH",
            Self::ProviderRateLimit => "PROVIDER_RATE_LIMIT",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ContextOverflow => "CONTEXT_OVERFLOW",
            Self::ToolResultFailed => "TOOL_RESULT_FAILED",
            Self::TokenExtraction => "TOKEN_EXTRACTION",
            Self::Internal => "INTERNAL",
        }
    }
}

impl Error {
    /// Map a domain error onto the RPC error code it surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::InvalidOperation(_) => ErrorCode::InvalidOperation,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::ProviderAuth(_) => ErrorCode::ProviderAuth,
            Error::RateLimited(_) => ErrorCode::ProviderRateLimit,
            Error::Provider { .. } | Error::Http(_) | Error::Timeout(_) => {
                ErrorCode::ProviderError
            }
            Error::ContextOverflow { .. } => ErrorCode::ContextOverflow,
            Error::TokenExtraction { .. } => ErrorCode::TokenExtraction,
            Error::Config(_) => ErrorCode::InvalidParams,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether a failed turn caused by this error may be retried by the
    /// caller (possibly after compaction).
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Timeout(_)
                | Error::Provider { .. }
                | Error::RateLimited(_)
                | Error::ContextOverflow { .. }
                | Error::Conflict(_)
        )
    }
}
