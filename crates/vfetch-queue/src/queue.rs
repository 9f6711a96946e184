//! Job queue using Redis Streams.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use vfetch_models::DownloadJob;

use crate::error::{QueueError, QueueResult};

/// Default retention of job records in seconds (one day).
pub const DEFAULT_JOB_RECORD_TTL_SECS: u64 = 86_400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// How long job records stay readable after their last write
    pub job_record_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vfetch:jobs".to_string(),
            consumer_group: "vfetch:workers".to_string(),
            job_record_ttl: Duration::from_secs(DEFAULT_JOB_RECORD_TTL_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "vfetch:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vfetch:workers".to_string()),
            job_record_ttl: Duration::from_secs(
                std::env::var("JOB_RECORD_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_JOB_RECORD_TTL_SECS),
            ),
        }
    }
}

/// A consumed queue entry: the broker message id and its job.
pub type QueuedJob = (String, DownloadJob);

/// Hand-off point between the dispatcher and the worker pool.
///
/// Delivery is at-least-once: a consumed job stays pending until acked and
/// can be reclaimed by another consumer once it has been idle long enough.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Prepare the queue (create the consumer group if needed).
    async fn init(&self) -> QueueResult<()>;

    /// Enqueue a job, returning the broker message id.
    async fn enqueue(&self, job: &DownloadJob) -> QueueResult<String>;

    /// Wait up to `block_ms` for new jobs and return at most `count` of them.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedJob>>;

    /// Take over jobs another consumer left pending for at least `min_idle_ms`.
    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedJob>>;

    /// Acknowledge a job (mark as handled).
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Number of entries still in the queue.
    async fn len(&self) -> QueueResult<u64>;
}

/// Redis Streams job queue with a consumer group.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Decode stream entries, acking any payload that cannot be parsed so it
    /// is not redelivered forever.
    async fn decode_entries(&self, entries: Vec<redis::streams::StreamId>) -> Vec<QueuedJob> {
        let mut jobs = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.id.clone();

            let payload = match entry.map.get("job") {
                Some(redis::Value::BulkString(payload)) => payload,
                _ => {
                    warn!(message_id = %message_id, "Stream entry has no job payload");
                    self.ack(&message_id).await.ok();
                    continue;
                }
            };

            match serde_json::from_slice::<DownloadJob>(payload) {
                Ok(job) => {
                    debug!(job_id = %job.job_id, message_id = %message_id, "Decoded job from stream");
                    jobs.push((message_id, job));
                }
                Err(e) => {
                    warn!(message_id = %message_id, "Failed to parse job payload: {}", e);
                    self.ack(&message_id).await.ok();
                }
            }
        }

        jobs
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Create consumer group (ignore error if already exists). Starting at
        // 0 keeps jobs that were enqueued before any worker came up.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, job: &DownloadJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(job_id = %job.job_id, message_id = %message_id, "Enqueued download job");

        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // A nil reply (block timed out) decodes as an empty reply
        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries = result
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries).await)
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks idle time, so a racing consumer cannot steal a job
        // that was just redelivered.
        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&stale)
            .query_async(&mut conn)
            .await?;

        let jobs = self.decode_entries(result.ids).await;
        for (message_id, job) in &jobs {
            info!(job_id = %job.job_id, message_id = %message_id, "Claimed pending job from stream");
        }

        Ok(jobs)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }
}

/// In-process queue for tests and single-binary runs.
///
/// Jobs are delivered exactly once; nothing is ever left pending, so
/// [`JobQueue::claim_pending`] always returns an empty batch.
pub struct MemoryJobQueue {
    sender: mpsc::UnboundedSender<DownloadJob>,
    receiver: Mutex<mpsc::UnboundedReceiver<DownloadJob>>,
    next_id: AtomicU64,
    queued: AtomicU64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            next_id: AtomicU64::new(1),
            queued: AtomicU64::new(0),
        }
    }

    fn next_message_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, job: &DownloadJob) -> QueueResult<String> {
        self.sender
            .send(job.clone())
            .map_err(|_| QueueError::enqueue_failed("queue is closed"))?;
        self.queued.fetch_add(1, Ordering::Relaxed);

        let message_id = self.next_message_id();
        debug!(job_id = %job.job_id, message_id = %message_id, "Enqueued download job in memory");
        Ok(message_id)
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedJob>> {
        let mut receiver = self.receiver.lock().await;
        let mut jobs = Vec::new();

        let first = tokio::time::timeout(Duration::from_millis(block_ms), receiver.recv()).await;
        match first {
            Ok(Some(job)) => jobs.push(job),
            Ok(None) => return Err(QueueError::dequeue_failed("queue is closed")),
            Err(_) => return Ok(Vec::new()),
        }

        while jobs.len() < count {
            match receiver.try_recv() {
                Ok(job) => jobs.push(job),
                Err(_) => break,
            }
        }

        self.queued.fetch_sub(jobs.len() as u64, Ordering::Relaxed);
        Ok(jobs
            .into_iter()
            .map(|job| (self.next_message_id(), job))
            .collect())
    }

    async fn claim_pending(
        &self,
        _consumer_name: &str,
        _min_idle_ms: u64,
        _count: usize,
    ) -> QueueResult<Vec<QueuedJob>> {
        Ok(Vec::new())
    }

    async fn ack(&self, _message_id: &str) -> QueueResult<()> {
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.queued.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_delivers_in_order() {
        let queue = MemoryJobQueue::new();
        let first = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");
        let second = DownloadJob::new("https://youtu.be/9bZkp7q19f0");

        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let jobs = queue.consume("test", 100, 10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].1.job_id, first.job_id);
        assert_eq!(jobs[1].1.job_id, second.job_id);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_queue_respects_count() {
        let queue = MemoryJobQueue::new();
        for _ in 0..3 {
            queue
                .enqueue(&DownloadJob::new("https://youtu.be/dQw4w9WgXcQ"))
                .await
                .unwrap();
        }

        assert_eq!(queue.consume("test", 100, 2).await.unwrap().len(), 2);
        assert_eq!(queue.consume("test", 100, 2).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_queue_block_times_out_empty() {
        let queue = MemoryJobQueue::new();
        let jobs = queue.consume("test", 1000, 1).await.unwrap();
        assert!(jobs.is_empty());
        assert!(queue.claim_pending("test", 0, 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "vfetch:jobs");
        assert_eq!(config.consumer_group, "vfetch:workers");
        assert_eq!(config.job_record_ttl, Duration::from_secs(86_400));
    }
}
