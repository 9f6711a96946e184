//! Download-transcode worker.
//!
//! This crate provides:
//! - Job executor with a bounded worker pool and crash recovery
//! - The download-transcode job
//! - The cache janitor
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod janitor;
pub mod logging;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use janitor::{CacheJanitor, SweepReport};
pub use logging::JobLogger;
pub use processor::{process_download_job, ProcessingContext};
