//! Error types shared by the conversation graph and the completion pipeline.

use thiserror::Error;

/// Status used when an upstream failure carries no explicit code.
pub const DEFAULT_UPSTREAM_STATUS: u16 = 500;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed or structurally invalid input (empty path, broken parent chain...).
    #[error("invalid request: {0}")]
    Validation(String),
    /// Caller identity is missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Conversation exists but belongs to another user.
    #[error("conversation {0} is owned by another user")]
    Forbidden(String),
    /// Conversation or message id does not resolve.
    #[error("not found: {0}")]
    NotFound(String),
    /// The completion provider failed.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        /// Provider status code, or [`DEFAULT_UPSTREAM_STATUS`].
        status: u16,
        /// Provider message.
        message: String,
        /// Provider error type, when supplied.
        kind: Option<String>,
    },
    /// A write transaction could not be committed.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl ChatError {
    /// HTTP status code this error maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Upstream { status, .. } => *status,
            Self::Persistence(_)
            | Self::InvalidConfig(_)
            | Self::Sqlite(_)
            | Self::TokioSqlite(_)
            | Self::Serialization(_)
            | Self::Url(_) => 500,
        }
    }

    /// Short machine-readable error type, used in response bodies.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::Forbidden(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::Upstream { kind, .. } => kind.as_deref().unwrap_or("upstream_error"),
            Self::InvalidConfig(_) => "configuration_error",
            Self::Persistence(_) | Self::Sqlite(_) | Self::TokioSqlite(_) => "persistence_error",
            Self::Serialization(_) | Self::Url(_) => "internal_error",
        }
    }
}

/// Convenience result alias.
pub type ChatResult<T> = Result<T, ChatError>;
