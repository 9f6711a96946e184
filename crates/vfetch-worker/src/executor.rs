//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vfetch_models::DownloadJob;
use vfetch_queue::JobQueue;

use crate::error::{WorkerError, WorkerResult};
use crate::processor::{process_download_job, ProcessingContext};

/// Block time for a single queue read.
const CONSUME_BLOCK_MS: u64 = 1000;
/// Upper bound on jobs taken from the queue per read.
const CONSUME_BATCH: usize = 5;

/// Job executor that processes jobs from the queue.
///
/// Each consumed job runs exactly once in this executor and is acked
/// whether it succeeded or failed; the job record carries the outcome.
pub struct JobExecutor {
    ctx: Arc<ProcessingContext>,
    queue: Arc<dyn JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(ctx: ProcessingContext, queue: Arc<dyn JobQueue>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            queue,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Start the executor. Returns after [`JobExecutor::shutdown`] once
    /// in-flight jobs drained or the shutdown timeout elapsed.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = &self.ctx.config;
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        // Shutdown is only observed between batches so a consumed batch is
        // always handed to workers.
        while !*shutdown_rx.borrow() {
            if let Err(e) = self.consume_jobs().await {
                error!("Error consuming jobs: {}", e);
                // Back off on error
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
        info!("Shutdown signal received, stopping executor");

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}, they will be reclaimed by another worker",
                config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically take over jobs left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let queue = Arc::clone(&self.queue);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        let interval_period = ctx.config.claim_interval.max(Duration::from_secs(1));
        let min_idle_ms = ctx.config.claim_min_idle.as_millis() as u64;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, queue, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Reserve worker slots, then consume at most that many jobs.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let semaphore = &self.job_semaphore;

        // All slots busy: give the shutdown check a chance every 100ms
        let first = match tokio::time::timeout(
            Duration::from_millis(100),
            Arc::clone(semaphore).acquire_owned(),
        )
        .await
        {
            Ok(permit) => permit.map_err(|_| WorkerError::job_failed("Semaphore closed"))?,
            Err(_) => return Ok(()),
        };

        let mut permits = vec![first];
        while permits.len() < CONSUME_BATCH {
            match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }

        if *self.shutdown.borrow() {
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, permits.len())
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        // Unused permits are released when the iterator is dropped
        for ((message_id, job), permit) in jobs.into_iter().zip(permits) {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, queue, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Execute a single job and acknowledge it regardless of outcome.
    async fn execute_job(
        ctx: Arc<ProcessingContext>,
        queue: Arc<dyn JobQueue>,
        message_id: String,
        job: DownloadJob,
    ) {
        let job_id = job.job_id.clone();

        // A redelivered job whose record is already final has nothing left to do
        match ctx.store.get(&job_id).await {
            Ok(Some(record)) if record.is_terminal() => {
                info!(job_id = %job_id, state = %record.state(), "Skipping job already in terminal state");
            }
            Ok(_) => {
                if let Err(e) = process_download_job(&ctx, &job).await {
                    debug!(job_id = %job_id, "Job ended with error: {}", e);
                }
            }
            Err(e) => {
                // Leave it pending so it is reclaimed once the store is back
                error!(job_id = %job_id, "Failed to read job record: {}", e);
                return;
            }
        }

        if let Err(e) = queue.ack(&message_id).await {
            error!(job_id = %job_id, "Failed to ack job: {}", e);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        let max_jobs = self.ctx.config.max_concurrent_jobs;
        while self.job_semaphore.available_permits() < max_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
