use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by session store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication service unreachable: {0}")]
    Network(String),
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("no remembered account with id '{0}'")]
    AccountNotFound(String),
    #[error("session storage unavailable: {0}")]
    Storage(String),
}

/// Errors returned by the auth API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("credentials rejected ({0})")]
    Unauthorized(StatusCode),
    #[error("HTTP status {status} body: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Whether the error proves the token itself is no longer valid.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

impl From<&ApiError> for SessionError {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => {
                SessionError::InvalidSession("session expired or revoked".into())
            }
            other => SessionError::Network(other.to_string()),
        }
    }
}

/// Errors raised by durable client storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Errors produced while handling the external login redirect.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login request denied ({0})")]
    AccessDenied(String),
    #[error("login callback missing token parameter")]
    MissingToken,
    #[error("login state mismatch")]
    StateMismatch,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
