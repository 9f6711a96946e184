//! Job status records keyed by job id.
//!
//! SUCCESS and FAILURE are final: once a record reaches a terminal state the
//! store refuses every later write for that job. Records expire after the
//! configured retention window.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use vfetch_models::{JobId, JobRecord};

use crate::error::{QueueError, QueueResult};
use crate::queue::QueueConfig;

/// Key prefix for job record hashes.
pub const JOB_KEY_PREFIX: &str = "vfetch:job";

/// Persistent job status storage shared by the API and the workers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write a record. Returns `false` when the write was refused because
    /// the stored record is already terminal.
    async fn put(&self, job_id: &JobId, record: &JobRecord) -> QueueResult<bool>;

    /// Read the current record, `None` when unknown or expired.
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Check the backing store is reachable.
    async fn ping(&self) -> QueueResult<()>;
}

/// Redis hash per job: `state` for the terminal check, `record` for the JSON body.
pub struct RedisJobStore {
    client: redis::Client,
    ttl: Duration,
    put_script: Script,
}

impl RedisJobStore {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            ttl: config.job_record_ttl,
            put_script: Script::new(
                r#"
                local current = redis.call('HGET', KEYS[1], 'state')
                if current == 'SUCCESS' or current == 'FAILURE' then
                    return 0
                end
                redis.call('HSET', KEYS[1], 'state', ARGV[1], 'record', ARGV[2])
                redis.call('EXPIRE', KEYS[1], ARGV[3])
                return 1
                "#,
            ),
        })
    }

    fn key(job_id: &JobId) -> String {
        format!("{}:{}", JOB_KEY_PREFIX, job_id)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put(&self, job_id: &JobId, record: &JobRecord) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;

        let written: i32 = self
            .put_script
            .key(Self::key(job_id))
            .arg(record.state().as_str())
            .arg(&payload)
            .arg(self.ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            debug!(job_id = %job_id, state = %record.state(), "Ignored write to terminal job record");
        }
        Ok(written == 1)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload: Option<String> = redis::cmd("HGET")
            .arg(Self::key(job_id))
            .arg("record")
            .query_async(&mut conn)
            .await?;

        match payload {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(job_id = %job_id, "Corrupt job record: {}", e);
                    Err(QueueError::store(format!("corrupt record for job {}", job_id)))
                }
            },
            None => Ok(None),
        }
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process job store. Records never expire.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job_id: &JobId, record: &JobRecord) -> QueueResult<bool> {
        let mut records = self.records.write().await;
        if records.get(job_id).is_some_and(JobRecord::is_terminal) {
            debug!(job_id = %job_id, state = %record.state(), "Ignored write to terminal job record");
            return Ok(false);
        }
        records.insert(job_id.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
