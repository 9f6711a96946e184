//! Application state.

use std::sync::Arc;

use vfetch_queue::{
    CounterStore, JobQueue, JobStore, QueueResult, RateLimiter, RedisCounterStore, RedisJobQueue,
    RedisJobStore, TaskDispatcher,
};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub dispatcher: TaskDispatcher,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create application state backed by Redis.
    pub async fn new(config: ApiConfig) -> QueueResult<Self> {
        let queue = RedisJobQueue::new(config.queue.clone())?;
        queue.init().await?;

        let store = RedisJobStore::new(&config.queue)?;
        let counters = RedisCounterStore::new(&config.queue.redis_url)?;

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(queue),
            Arc::new(counters),
        ))
    }

    /// Assemble state from already constructed stores.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            counters,
            config.rate_limit_requests,
            config.rate_limit_window,
        );
        let dispatcher = TaskDispatcher::new(Arc::clone(&store), Arc::clone(&queue));

        Self {
            config,
            store,
            queue,
            dispatcher,
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}
