//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Upper bound on a single job, extraction and conversion included
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Base directory that artifact paths are reported relative to
    pub base_dir: PathBuf,
    /// Directory holding downloaded and finished artifacts
    pub cache_dir: PathBuf,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Files older than this are removed by the janitor
    pub cache_retention: Duration,
    /// Janitor schedule period, aligned to multiples since the Unix epoch
    pub janitor_interval: Duration,
    /// Whether this worker runs the janitor
    pub janitor_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let job_timeout = Duration::from_secs(3600); // 1 hour

        Self {
            max_concurrent_jobs: 2,
            job_timeout,
            shutdown_timeout: Duration::from_secs(30),
            cache_dir: base_dir.join("cache"),
            base_dir,
            claim_interval: Duration::from_secs(30),
            // A job still running cannot be idle longer than its timeout
            claim_min_idle: job_timeout + Duration::from_secs(60),
            cache_retention: Duration::from_secs(3600),
            janitor_interval: Duration::from_secs(3600),
            janitor_enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_dir = std::env::var("APP_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_dir);
        let cache_dir = resolve_cache_dir(
            &base_dir,
            &std::env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string()),
        );

        let job_timeout = env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.job_timeout);

        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout,
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
            base_dir,
            cache_dir,
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS")
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS")
                .unwrap_or(job_timeout + Duration::from_secs(60)),
            cache_retention: env_secs("CACHE_RETENTION_SECS").unwrap_or(defaults.cache_retention),
            janitor_interval: env_secs("JANITOR_INTERVAL_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.janitor_interval),
            janitor_enabled: std::env::var("JANITOR_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Relative cache directories are taken relative to the base directory.
pub fn resolve_cache_dir(base_dir: &Path, cache_dir: &str) -> PathBuf {
    let cache_dir = Path::new(cache_dir);
    if cache_dir.is_absolute() {
        cache_dir.to_path_buf()
    } else {
        base_dir.join(cache_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.cache_retention, Duration::from_secs(3600));
        assert!(config.claim_min_idle > config.job_timeout);
        assert!(config.cache_dir.starts_with(&config.base_dir));
    }

    #[test]
    fn test_resolve_cache_dir() {
        assert_eq!(
            resolve_cache_dir(Path::new("/srv/app"), "cache"),
            PathBuf::from("/srv/app/cache")
        );
        assert_eq!(
            resolve_cache_dir(Path::new("/srv/app"), "/var/cache/vfetch"),
            PathBuf::from("/var/cache/vfetch")
        );
    }
}
