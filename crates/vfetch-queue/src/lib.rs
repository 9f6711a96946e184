//! Redis-backed stores and task dispatch for vfetch.
//!
//! This crate provides:
//! - Job enqueueing and consumption via Redis Streams
//! - The job status store with final terminal states
//! - Fixed-window rate-limit counters
//! - The task dispatcher used by the HTTP layer
//!
//! Every store has an in-memory variant for tests and single-process runs.

pub mod dispatcher;
pub mod error;
pub mod job_store;
pub mod queue;
pub mod rate_limit;

pub use dispatcher::TaskDispatcher;
pub use error::{DispatchError, QueueError, QueueResult};
pub use job_store::{JobStore, MemoryJobStore, RedisJobStore};
pub use queue::{JobQueue, MemoryJobQueue, QueueConfig, QueuedJob, RedisJobQueue};
pub use rate_limit::{CounterStore, MemoryCounterStore, RateDecision, RateLimiter, RedisCounterStore};
