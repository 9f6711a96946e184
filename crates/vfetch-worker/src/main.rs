//! Download worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vfetch_media::{FfmpegTranscoder, YtDlpExtractor};
use vfetch_queue::{QueueConfig, RedisJobQueue, RedisJobStore};
use vfetch_worker::{CacheJanitor, JobExecutor, ProcessingContext, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for Redis over TLS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting vfetch-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = QueueConfig::from_env();
    let queue = RedisJobQueue::new(queue_config.clone()).context("Failed to create job queue")?;
    let store = RedisJobStore::new(&queue_config).context("Failed to create job store")?;

    if let Err(e) = vfetch_media::check_ytdlp() {
        error!("{}; downloads will fail until it is installed", e);
    }

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create cache dir {}", config.cache_dir.display()))?;

    let ctx = ProcessingContext::new(
        config.clone(),
        Arc::new(store),
        Arc::new(YtDlpExtractor::new()),
        Arc::new(FfmpegTranscoder::new().with_timeout(config.job_timeout.as_secs())),
    );
    let executor = Arc::new(JobExecutor::new(ctx, Arc::new(queue)));

    let (janitor_shutdown, janitor_shutdown_rx) = tokio::sync::watch::channel(false);
    let janitor_handle = config.janitor_enabled.then(|| {
        let janitor = CacheJanitor::from_config(&config);
        tokio::spawn(async move { janitor.run(janitor_shutdown_rx).await })
    });

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
        let _ = janitor_shutdown.send(true);
    });

    executor.run().await.context("Executor error")?;

    if let Some(handle) = janitor_handle {
        handle.await.ok();
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vfetch=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    Ok(())
}
