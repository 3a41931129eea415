//! Crate-wide error taxonomy.
//!
//! `CoreError` covers genuine invariant breaches and boot-time failures.
//! Tool-level failure is *not* modeled as an error: a failed invocation is a
//! [`crate::model::envelope::ToolResult`] with `success = false`, returned
//! normally. See spec §7 for the distinction.

use thiserror::Error;

/// The `error_code` taxonomy carried on [`crate::model::envelope::ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    InvalidRequest,
    CanonViolation,
    TrustRejected,
    ToolCrash,
    Timeout,
    Overloaded,
    DependencyUnavailable,
    PolicyBlocked,
    Internal,
}

impl ErrorCode {
    /// Whether the caller should expect a retry to possibly succeed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::ToolCrash | ErrorCode::Timeout | ErrorCode::Overloaded | ErrorCode::DependencyUnavailable
        )
    }
}

/// Failures that abort an API call outright rather than producing a `ToolResult`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no tool registered under name '{0}'")]
    UnknownTool(String),

    #[error("envelope is malformed: {0}")]
    MalformedEnvelope(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invariant breach: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
