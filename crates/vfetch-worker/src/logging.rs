//! Structured job logging utilities.

use tracing::{error, info, warn, Span};
use vfetch_models::JobId;

/// Job logger carrying the job id and source URL on every event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    url: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, url: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            url: url.to_string(),
        }
    }

    pub fn log_start(&self) {
        info!(job_id = %self.job_id, url = %self.url, "Download job started");
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, url = %self.url, "Job warning: {}", message);
    }

    /// Failures carry the URL so they can be traced back without the record.
    pub fn log_failure(&self, message: &str) {
        error!(job_id = %self.job_id, url = %self.url, "Download job failed: {}", message);
    }

    pub fn log_completion(&self, filename: &str, elapsed_ms: u128) {
        info!(
            job_id = %self.job_id,
            filename = %filename,
            elapsed_ms = elapsed_ms as u64,
            "Download job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Span wrapping the whole job so tool output logged below it is attributed.
    pub fn span(&self) -> Span {
        tracing::info_span!("download_job", job_id = %self.job_id)
    }
}
