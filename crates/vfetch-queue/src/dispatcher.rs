//! Task submission.

use std::sync::Arc;

use tracing::{info, warn};
use vfetch_models::{validate_video_url, DownloadJob, JobId, JobRecord};

use crate::error::DispatchError;
use crate::job_store::JobStore;
use crate::queue::JobQueue;

/// Accepts download requests and hands them to the worker pool.
#[derive(Clone)]
pub struct TaskDispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate `url`, record a PENDING job and enqueue it.
    ///
    /// Returns as soon as the job is queued. An invalid URL creates nothing.
    pub async fn submit(&self, url: &str) -> Result<JobId, DispatchError> {
        let url = validate_video_url(url)?;
        let job = DownloadJob::new(url);

        // The record must exist before a worker can pick the job up
        self.store.put(&job.job_id, &JobRecord::Pending).await?;

        if let Err(e) = self.queue.enqueue(&job).await {
            warn!(job_id = %job.job_id, "Failed to enqueue job: {}", e);
            let reason = format!("Failed to enqueue job: {}", e);
            self.store.put(&job.job_id, &JobRecord::failure(reason)).await.ok();
            return Err(e.into());
        }

        info!(job_id = %job.job_id, url = %job.url, "Download job submitted");
        Ok(job.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::MemoryJobStore;
    use crate::queue::MemoryJobQueue;
    use vfetch_models::{JobState, UrlError};

    fn dispatcher() -> (TaskDispatcher, Arc<MemoryJobStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (
            TaskDispatcher::new(store.clone(), queue.clone()),
            store,
            queue,
        )
    }

    #[tokio::test]
    async fn test_submit_records_pending_and_enqueues() {
        let (dispatcher, store, queue) = dispatcher();

        let id = tokio_test::assert_ok!(
            dispatcher
                .submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
                .await
        );

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state(), JobState::Pending);

        let jobs = queue.consume("test", 100, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1.job_id, id);
        assert_eq!(jobs[0].1.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_submit_returns_unique_ids() {
        let (dispatcher, _, _) = dispatcher();
        let a = dispatcher.submit("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        let b = dispatcher.submit("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_url_creates_nothing() {
        let (dispatcher, _, queue) = dispatcher();

        let err = dispatcher.submit("not a url").await.unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, DispatchError::InvalidUrl(UrlError::InvalidScheme)));

        let err = dispatcher.submit("").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidUrl(UrlError::Missing)));

        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
