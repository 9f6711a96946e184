//! The download-transcode job.
//!
//! A job moves PENDING -> PROGRESS -> SUCCESS | FAILURE. Everything it writes
//! to the cache directory uses a job-scoped `staging-<job_id>` name until the
//! finished MP4 is renamed to its canonical artifact name, so the serving path
//! never sees a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, warn, Instrument};
use vfetch_media::fs_utils::{move_file, remove_if_exists, touch};
use vfetch_media::{DownloadProgress, Extractor, Transcoder};
use vfetch_models::{artifact_filename, ArtifactRef, DownloadJob, JobId, JobRecord};
use vfetch_queue::JobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Prefix of every in-flight file in the cache directory.
pub const STAGING_PREFIX: &str = "staging-";

/// Shared dependencies of every job run by this worker.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn JobStore>,
    pub extractor: Arc<dyn Extractor>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl ProcessingContext {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config,
            store,
            extractor,
            transcoder,
        }
    }
}

/// Job-scoped file names inside the cache directory.
#[derive(Debug, Clone)]
struct StagingFiles {
    cache_dir: PathBuf,
    prefix: String,
}

impl StagingFiles {
    fn new(cache_dir: &Path, job_id: &JobId) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            prefix: format!("{}{}.", STAGING_PREFIX, job_id),
        }
    }

    /// Extractor output template; the extension is filled in by yt-dlp.
    fn download_template(&self) -> PathBuf {
        self.cache_dir.join(format!("{}%(ext)s", self.prefix))
    }

    fn converting(&self) -> PathBuf {
        self.cache_dir.join(format!("{}converting.mp4", self.prefix))
    }

    /// Remove every file this job left behind (partial downloads included).
    async fn cleanup(&self) {
        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {} for cleanup: {}", self.cache_dir.display(), e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            if let Err(e) = remove_if_exists(entry.path()).await {
                warn!("Failed to remove staging file {}: {}", entry.path().display(), e);
            }
        }
    }
}

/// Run one job to completion and record its terminal state.
///
/// The whole job is bounded by `config.job_timeout`; on expiry the external
/// tools are killed and the job fails. Returns the artifact on success; the
/// error is also recorded in the job store.
pub async fn process_download_job(
    ctx: &ProcessingContext,
    job: &DownloadJob,
) -> WorkerResult<ArtifactRef> {
    let logger = JobLogger::new(&job.job_id, &job.url);
    let span = logger.span();
    let started = Instant::now();

    async {
        logger.log_start();

        let staging = StagingFiles::new(&ctx.config.cache_dir, &job.job_id);
        let timeout = ctx.config.job_timeout;

        let result = match tokio::time::timeout(timeout, run_job(ctx, job, &staging, &logger)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(timeout.as_secs())),
        };

        staging.cleanup().await;

        // A SUCCESS record that cannot be written still has to end the job
        let result = match result {
            Ok(artifact) => ctx
                .store
                .put(&job.job_id, &JobRecord::success(artifact.clone()))
                .await
                .map(|_| artifact)
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(artifact) => {
                metrics::counter!("vfetch_jobs_completed_total").increment(1);
                logger.log_completion(&artifact.filename, started.elapsed().as_millis());
                Ok(artifact)
            }
            Err(e) => {
                let message = e.to_string();
                logger.log_failure(&message);
                metrics::counter!("vfetch_jobs_failed_total").increment(1);
                if let Err(store_err) = ctx
                    .store
                    .put(&job.job_id, &JobRecord::failure(message))
                    .await
                {
                    logger.log_warning(&format!("Failed to record failure: {}", store_err));
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_job(
    ctx: &ProcessingContext,
    job: &DownloadJob,
    staging: &StagingFiles,
    logger: &JobLogger,
) -> WorkerResult<ArtifactRef> {
    let store = ctx.store.as_ref();
    let cache_dir = &ctx.config.cache_dir;

    store.put(&job.job_id, &JobRecord::starting()).await?;
    tokio::fs::create_dir_all(cache_dir).await?;

    // Extraction and the progress updater run side by side; the updater is
    // the only writer while the extractor runs and finishes once the
    // extractor drops its sender.
    let (progress_tx, progress_rx) = watch::channel(DownloadProgress::default());
    let template = staging.download_template();
    let (extracted, ()) = tokio::join!(
        ctx.extractor.extract(&job.url, &template, progress_tx),
        forward_progress(store, &job.job_id, progress_rx),
    );
    let media = extracted?;

    store.put(&job.job_id, &JobRecord::converting()).await?;
    logger.log_progress("download finished, normalizing to MP4");

    let filename = artifact_filename(&media.video_id);
    let final_path = cache_dir.join(&filename);

    let publish_from = if media.is_mp4() {
        media.path.clone()
    } else {
        let converting = staging.converting();
        ctx.transcoder.to_mp4(&media.path, &converting).await?;
        if let Err(e) = remove_if_exists(&media.path).await {
            logger.log_warning(&format!("Failed to remove pre-conversion file: {}", e));
        }
        converting
    };

    // Retention is measured from publication, not from the source's
    // Last-Modified date the extractor may have copied onto the file.
    touch(&publish_from).await?;
    move_file(&publish_from, &final_path).await?;

    Ok(ArtifactRef {
        path: relative_path(&ctx.config.base_dir, &final_path, &filename),
        filename,
        video_id: media.video_id,
    })
}

/// Write each new progress value to the job record until the sender closes.
async fn forward_progress(
    store: &dyn JobStore,
    job_id: &JobId,
    mut progress: watch::Receiver<DownloadProgress>,
) {
    while progress.changed().await.is_ok() {
        let current = *progress.borrow_and_update();
        if let Err(e) = store
            .put(job_id, &JobRecord::downloading(current.downloaded_bytes))
            .await
        {
            warn!(job_id = %job_id, "Failed to record download progress: {}", e);
        }
    }
}

/// Path of an artifact relative to the base directory, never absolute.
fn relative_path(base_dir: &Path, path: &Path, filename: &str) -> String {
    match path.strip_prefix(base_dir) {
        Ok(relative) => relative.to_string_lossy().to_string(),
        Err(_) => filename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use vfetch_media::{ExtractedMedia, MediaError, MediaResult};
    use vfetch_models::JobState;

    use crate::janitor::CacheJanitor;
    use vfetch_queue::{MemoryJobStore, QueueError, QueueResult};

    /// Writes a file named from the template and reports a few progress steps.
    struct FakeExtractor {
        video_id: String,
        extension: String,
        fail_with: Option<String>,
        hang: bool,
        /// Stamp the download with an old mtime, as `--mtime` would
        stale_mtime: bool,
    }

    impl FakeExtractor {
        fn producing(video_id: &str, extension: &str) -> Self {
            Self {
                video_id: video_id.to_string(),
                extension: extension.to_string(),
                fail_with: None,
                hang: false,
                stale_mtime: false,
            }
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(
            &self,
            _url: &str,
            output_template: &Path,
            progress: watch::Sender<DownloadProgress>,
        ) -> MediaResult<ExtractedMedia> {
            for bytes in [1024, 2048, 4096] {
                progress.send_replace(DownloadProgress {
                    downloaded_bytes: bytes,
                    total_bytes: Some(4096),
                });
                tokio::task::yield_now().await;
            }

            if self.hang {
                std::future::pending::<()>().await;
            }

            let path = PathBuf::from(
                output_template
                    .to_string_lossy()
                    .replace("%(ext)s", &self.extension),
            );
            tokio::fs::write(&path, b"media").await?;
            if self.stale_mtime {
                let month_ago = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
                std::fs::File::options()
                    .write(true)
                    .open(&path)?
                    .set_modified(month_ago)?;
            }

            if let Some(message) = &self.fail_with {
                return Err(MediaError::download_failed(message.clone()));
            }

            Ok(ExtractedMedia {
                video_id: self.video_id.clone(),
                path,
            })
        }
    }

    #[derive(Default)]
    struct FakeTranscoder {
        fail: bool,
        calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn to_mp4(&self, input: &Path, output: &Path) -> MediaResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((input.to_path_buf(), output.to_path_buf()));
            // Leave a partial output behind like an aborted encoder would
            tokio::fs::write(output, b"partial").await?;
            if self.fail {
                return Err(MediaError::ffmpeg_failed("FFmpeg exited with exit status: 1: boom", None, Some(1)));
            }
            tokio::fs::write(output, b"converted").await?;
            Ok(())
        }
    }

    /// Store wrapper that records every state written, in order.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryJobStore,
        history: Mutex<Vec<JobRecord>>,
        /// Fail every SUCCESS write, as an unreachable store would
        reject_success: bool,
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn put(&self, job_id: &JobId, record: &JobRecord) -> QueueResult<bool> {
            if self.reject_success && record.state() == JobState::Success {
                return Err(QueueError::store("connection reset"));
            }
            let written = self.inner.put(job_id, record).await?;
            if written {
                self.history.lock().unwrap().push(record.clone());
            }
            Ok(written)
        }

        async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
            self.inner.get(job_id).await
        }

        async fn ping(&self) -> QueueResult<()> {
            Ok(())
        }
    }

    fn context(
        dir: &TempDir,
        store: Arc<RecordingStore>,
        extractor: FakeExtractor,
        transcoder: Arc<FakeTranscoder>,
    ) -> ProcessingContext {
        let config = WorkerConfig {
            base_dir: dir.path().to_path_buf(),
            cache_dir: dir.path().join("cache"),
            job_timeout: Duration::from_secs(30),
            ..WorkerConfig::default()
        };
        ProcessingContext::new(config, store, Arc::new(extractor), transcoder)
    }

    fn cache_entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_mp4_download_skips_conversion() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let transcoder = Arc::new(FakeTranscoder::default());
        let ctx = context(
            &dir,
            store.clone(),
            FakeExtractor::producing("dQw4w9WgXcQ", "mp4"),
            transcoder.clone(),
        );
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        let artifact = process_download_job(&ctx, &job).await.unwrap();

        assert_eq!(artifact.filename, artifact_filename("dQw4w9WgXcQ"));
        assert_eq!(artifact.path, format!("cache/{}", artifact.filename));
        assert_eq!(artifact.video_id, "dQw4w9WgXcQ");
        assert!(transcoder.calls.lock().unwrap().is_empty());
        assert_eq!(cache_entries(&dir), vec![artifact.filename.clone()]);

        let record = store.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record, JobRecord::success(artifact));
    }

    #[tokio::test]
    async fn test_unrecorded_success_becomes_failure() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore {
            reject_success: true,
            ..RecordingStore::default()
        });
        let ctx = context(
            &dir,
            store.clone(),
            FakeExtractor::producing("dQw4w9WgXcQ", "mp4"),
            Arc::new(FakeTranscoder::default()),
        );
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        assert!(process_download_job(&ctx, &job).await.is_err());

        match store.get(&job.job_id).await.unwrap().unwrap() {
            JobRecord::Failure { error, .. } => assert!(error.contains("connection reset")),
            other => panic!("job left in {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_artifact_age_starts_at_publication() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let extractor = FakeExtractor {
            stale_mtime: true,
            ..FakeExtractor::producing("dQw4w9WgXcQ", "mp4")
        };
        let ctx = context(&dir, store, extractor, Arc::new(FakeTranscoder::default()));

        let artifact = process_download_job(&ctx, &DownloadJob::new("https://youtu.be/dQw4w9WgXcQ"))
            .await
            .unwrap();

        let report = CacheJanitor::from_config(&ctx.config).sweep().await;
        assert!(report.removed.is_empty(), "swept {:?}", report.removed);
        assert_eq!(cache_entries(&dir), vec![artifact.filename]);
    }

    #[tokio::test]
    async fn test_non_mp4_is_converted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let transcoder = Arc::new(FakeTranscoder::default());
        let ctx = context(
            &dir,
            store.clone(),
            FakeExtractor::producing("dQw4w9WgXcQ", "webm"),
            transcoder.clone(),
        );
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        let artifact = process_download_job(&ctx, &job).await.unwrap();

        let calls = transcoder.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.to_string_lossy().ends_with(".webm"));

        // Only the canonical artifact remains; the pre-conversion file is gone
        assert_eq!(cache_entries(&dir), vec![artifact.filename.clone()]);
        let content = std::fs::read(dir.path().join("cache").join(&artifact.filename)).unwrap();
        assert_eq!(content, b"converted");
    }

    #[tokio::test]
    async fn test_state_sequence() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let ctx = context(
            &dir,
            store.clone(),
            FakeExtractor::producing("dQw4w9WgXcQ", "webm"),
            Arc::new(FakeTranscoder::default()),
        );
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        process_download_job(&ctx, &job).await.unwrap();

        let history = store.history.lock().unwrap().clone();
        assert_eq!(history.first(), Some(&JobRecord::starting()));
        assert_eq!(history.last().map(JobRecord::state), Some(JobState::Success));

        // Converting comes after every download progress write
        let converting = history
            .iter()
            .position(|r| *r == JobRecord::converting())
            .unwrap();
        assert_eq!(converting, history.len() - 2);
        assert!(history[1..converting]
            .iter()
            .all(|r| r.status().starts_with("Download progress: ")));
    }

    #[tokio::test]
    async fn test_extractor_failure_records_error() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let extractor = FakeExtractor {
            fail_with: Some("yt-dlp failed: ERROR: Video unavailable".to_string()),
            ..FakeExtractor::producing("dQw4w9WgXcQ", "webm")
        };
        let ctx = context(&dir, store.clone(), extractor, Arc::new(FakeTranscoder::default()));
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        assert!(process_download_job(&ctx, &job).await.is_err());

        match store.get(&job.job_id).await.unwrap().unwrap() {
            JobRecord::Failure { error, .. } => assert!(error.contains("Video unavailable")),
            other => panic!("expected failure, got {:?}", other),
        }
        // Partial download was cleaned up
        assert!(cache_entries(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let transcoder = Arc::new(FakeTranscoder {
            fail: true,
            ..FakeTranscoder::default()
        });
        let ctx = context(
            &dir,
            store.clone(),
            FakeExtractor::producing("dQw4w9WgXcQ", "webm"),
            transcoder,
        );
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        let err = process_download_job(&ctx, &job).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let record = store.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record.state(), JobState::Failure);
        assert!(cache_entries(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure_keeps_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        let existing = cache.join(artifact_filename("dQw4w9WgXcQ"));
        std::fs::write(&existing, b"previous").unwrap();

        let store = Arc::new(RecordingStore::default());
        let transcoder = Arc::new(FakeTranscoder {
            fail: true,
            ..FakeTranscoder::default()
        });
        let ctx = context(
            &dir,
            store,
            FakeExtractor::producing("dQw4w9WgXcQ", "webm"),
            transcoder,
        );

        process_download_job(&ctx, &DownloadJob::new("https://youtu.be/dQw4w9WgXcQ"))
            .await
            .unwrap_err();

        assert_eq!(std::fs::read(&existing).unwrap(), b"previous");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_extractor_times_out() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let extractor = FakeExtractor {
            hang: true,
            ..FakeExtractor::producing("dQw4w9WgXcQ", "mp4")
        };
        let ctx = context(&dir, store.clone(), extractor, Arc::new(FakeTranscoder::default()));
        let job = DownloadJob::new("https://youtu.be/dQw4w9WgXcQ");

        let err = process_download_job(&ctx, &job).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(30)));

        match store.get(&job.job_id).await.unwrap().unwrap() {
            JobRecord::Failure { error, .. } => assert_eq!(error, "Job timed out after 30 seconds"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/srv/app"), Path::new("/srv/app/cache/a.mp4"), "a.mp4"),
            "cache/a.mp4"
        );
        assert_eq!(
            relative_path(Path::new("/srv/app"), Path::new("/var/cache/a.mp4"), "a.mp4"),
            "a.mp4"
        );
    }

    #[test]
    fn test_staging_names_are_not_servable() {
        let staging = StagingFiles::new(Path::new("/cache"), &JobId::new());
        let converting = staging.converting();
        let name = converting.file_name().unwrap().to_string_lossy();
        assert!(!vfetch_models::is_valid_artifact_name(&name));
        assert!(name.starts_with(STAGING_PREFIX));
    }
}
