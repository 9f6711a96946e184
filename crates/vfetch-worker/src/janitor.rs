//! Cache janitor.
//!
//! Deletes files in the cache directory whose modification time is older
//! than the retention window. Runs on a fixed schedule aligned to multiples
//! of the interval since the Unix epoch, so an hourly janitor fires at the
//! top of every hour regardless of when the worker started.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Names of removed files
    pub removed: Vec<String>,
    /// Per-file or directory errors, already logged
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CacheJanitor {
    cache_dir: PathBuf,
    retention: Duration,
    interval: Duration,
}

impl CacheJanitor {
    pub fn new(cache_dir: impl Into<PathBuf>, retention: Duration, interval: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            retention,
            interval,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.cache_dir.clone(),
            config.cache_retention,
            config.janitor_interval,
        )
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Sweep against the current wall clock.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Remove every regular file directly inside the cache directory with
    /// `now - mtime > retention`. A missing directory is an empty sweep.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache directory {} does not exist", self.cache_dir.display());
                return report;
            }
            Err(e) => {
                error!("Failed to list cache directory {}: {}", self.cache_dir.display(), e);
                report.errors.push(format!("{}: {}", self.cache_dir.display(), e));
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read cache directory entry: {}", e);
                    report.errors.push(e.to_string());
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();

            match self.remove_if_expired(&entry.path(), now).await {
                Ok(true) => report.removed.push(name),
                Ok(false) => {}
                Err(e) => {
                    // A file may vanish or still be open by a running job
                    warn!(filename = %name, "Failed to clean cache file: {}", e);
                    report.errors.push(format!("{}: {}", name, e));
                }
            }
        }

        report.removed.sort();
        report
    }

    async fn remove_if_expired(&self, path: &Path, now: SystemTime) -> std::io::Result<bool> {
        // symlink_metadata so a link is never followed out of the cache
        let metadata = tokio::fs::symlink_metadata(path).await?;
        if !metadata.is_file() {
            return Ok(false);
        }

        let modified = metadata.modified()?;
        let age = match now.duration_since(modified) {
            Ok(age) => age,
            // Modified in the future relative to `now`
            Err(_) => return Ok(false),
        };

        if age <= self.retention {
            return Ok(false);
        }

        tokio::fs::remove_file(path).await?;
        Ok(true)
    }

    /// Run sweeps on schedule until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            cache_dir = %self.cache_dir.display(),
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Cache janitor started"
        );

        loop {
            let since_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let delay = delay_until_next_run(since_epoch, self.interval);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.sweep().await;
            metrics::counter!("vfetch_janitor_removed_files_total")
                .increment(report.removed.len() as u64);
            info!(
                removed = report.removed.len(),
                errors = report.errors.len(),
                files = ?report.removed,
                "Cache sweep finished"
            );
        }

        info!("Cache janitor stopped");
    }
}

/// Time from `since_epoch` to the next multiple of `interval`. Exactly on a
/// boundary the full interval is returned so a run never repeats.
pub fn delay_until_next_run(since_epoch: Duration, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1);
    let elapsed_in_period = since_epoch.as_millis() % interval_ms;
    Duration::from_millis((interval_ms - elapsed_in_period) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    /// Whole-second clock so filesystem timestamp precision cannot shift ages.
    fn now() -> SystemTime {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn touch(dir: &Path, name: &str, modified: SystemTime) {
        let file = File::create(dir.join(name)).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[tokio::test]
    async fn test_removes_only_expired_files() {
        let dir = TempDir::new().unwrap();
        let now = now();
        touch(dir.path(), "old.mp4", now - Duration::from_secs(3601));
        touch(dir.path(), "fresh.mp4", now - Duration::from_secs(3599));

        let janitor = CacheJanitor::new(dir.path(), HOUR, HOUR);
        let report = janitor.sweep_at(now).await;

        assert_eq!(report.removed, vec!["old.mp4".to_string()]);
        assert!(report.is_clean());
        assert!(!dir.path().join("old.mp4").exists());
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[tokio::test]
    async fn test_exact_retention_is_kept() {
        let dir = TempDir::new().unwrap();
        let now = now();
        touch(dir.path(), "edge.mp4", now - HOUR);

        let report = CacheJanitor::new(dir.path(), HOUR, HOUR).sweep_at(now).await;
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_second_sweep_is_empty() {
        let dir = TempDir::new().unwrap();
        let now = now();
        touch(dir.path(), "a.mp4", now - Duration::from_secs(7200));
        touch(dir.path(), "b.webm", now - Duration::from_secs(7200));

        let janitor = CacheJanitor::new(dir.path(), HOUR, HOUR);
        assert_eq!(janitor.sweep_at(now).await.removed, vec!["a.mp4", "b.webm"]);
        assert_eq!(janitor.sweep_at(now).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_subdirectories_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "old.mp4", now() - 2 * HOUR);

        let report = CacheJanitor::new(dir.path(), HOUR, HOUR)
            .sweep_at(now())
            .await;
        assert!(report.removed.is_empty());
        assert!(dir.path().join("nested").join("old.mp4").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_sweep() {
        let dir = TempDir::new().unwrap();
        let janitor = CacheJanitor::new(dir.path().join("missing"), HOUR, HOUR);
        assert_eq!(janitor.sweep().await, SweepReport::default());
    }

    #[test]
    fn test_delay_aligns_to_interval() {
        // 10:15:00 -> next run at 11:00:00
        let since_epoch = Duration::from_secs(10 * 3600 + 15 * 60);
        assert_eq!(delay_until_next_run(since_epoch, HOUR), Duration::from_secs(45 * 60));

        // Exactly on the hour waits a full hour
        assert_eq!(delay_until_next_run(Duration::from_secs(7200), HOUR), HOUR);

        assert_eq!(
            delay_until_next_run(Duration::from_millis(59_500), Duration::from_secs(60)),
            Duration::from_millis(500)
        );
    }
}
