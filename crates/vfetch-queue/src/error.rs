//! Queue and store error types.

use thiserror::Error;
use vfetch_models::UrlError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn dequeue_failed(msg: impl Into<String>) -> Self {
        Self::DequeueFailed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Errors returned by the task dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The URL failed syntactic validation; no job was created.
    #[error("{0}")]
    InvalidUrl(#[from] UrlError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DispatchError {
    /// Client errors are caused by the submitted input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DispatchError::InvalidUrl(_))
    }
}
