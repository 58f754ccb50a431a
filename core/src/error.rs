use std::io;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, CoreErr>;

#[derive(Error, Debug)]
pub enum CoreErr {
    /// Missing/invalid principal, or the addressed entity belongs to a
    /// different team than the caller's active one.
    #[error("authentication failed or team mismatch")]
    Auth,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The request explicitly asked for a capability the policy denies.
    /// Silent clears never surface as this error.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Workspace sandbox rejected a path that resolves outside the root.
    #[error("path escapes workspace root: {0}")]
    PathEscape(String),

    /// Workspace sandbox rejected a sensitive file or directory name.
    #[error("sensitive path refused: {0}")]
    SensitivePath(String),

    #[error("tool disabled by capability policy: {0}")]
    ToolDisabled(String),

    #[error("tool timed out after {0}ms")]
    ToolTimeout(u64),

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("provider timeout")]
    ProviderTimeout,

    /// The provider stream disconnected or errored out after the HTTP
    /// handshake succeeded. Treated as transient and retried with backoff.
    #[error("stream disconnected before completion: {0}")]
    Stream(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Client disconnect; the turn aborted at a step boundary.
    #[error("turn cancelled")]
    Cancelled,

    /// Retry limit exceeded while talking to a provider.
    #[error("exceeded retry limit, last status: {0}")]
    RetryLimit(StatusCode),

    /// Unexpected HTTP status code from a provider.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}

impl CoreErr {
    /// True when the failure should be reported inside the event stream as a
    /// `tool_result` error rather than bubbling out of the turn.
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            CoreErr::PathEscape(_)
                | CoreErr::SensitivePath(_)
                | CoreErr::ToolDisabled(_)
                | CoreErr::ToolTimeout(_)
                | CoreErr::ToolFailure(_)
        )
    }
}
