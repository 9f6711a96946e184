//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Media(#[from] vfetch_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vfetch_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfetch_media::MediaError;

    #[test]
    fn test_media_errors_keep_tool_message() {
        let err: WorkerError = MediaError::download_failed("yt-dlp failed: ERROR: Video unavailable").into();
        assert_eq!(
            err.to_string(),
            "Download failed: yt-dlp failed: ERROR: Video unavailable"
        );
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            WorkerError::Timeout(3600).to_string(),
            "Job timed out after 3600 seconds"
        );
    }
}
