//! Job definitions shared by the dispatcher, the worker and the status API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::ArtifactRef;

/// Status text reported for a job that no worker has picked up yet.
pub const STATUS_WAITING: &str = "Task is waiting to be processed";
/// Status text for the first PROGRESS transition.
pub const STATUS_STARTING: &str = "Starting download";
/// Status text once extraction finished and normalization begins.
pub const STATUS_CONVERTING: &str = "Download finished, converting format";
/// Status text carried by SUCCESS records.
pub const STATUS_COMPLETED: &str = "completed";
/// Status text carried by FAILURE records.
pub const STATUS_FAILED: &str = "Download failed";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Submitted, not yet picked up (also reported for unknown ids)
    #[default]
    Pending,
    /// A worker is executing the job
    Progress,
    /// Artifact is ready
    Success,
    /// Job ended with an error
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Progress => "PROGRESS",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    /// Terminal states accept no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status record of a job, one case per state.
///
/// Each case carries only the fields valid for that state, so a SUCCESS
/// record always has an artifact and a FAILURE record always has an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRecord {
    Pending,
    Progress {
        status: String,
    },
    Success {
        status: String,
        artifact: ArtifactRef,
    },
    Failure {
        status: String,
        error: String,
    },
}

impl JobRecord {
    pub fn starting() -> Self {
        Self::Progress {
            status: STATUS_STARTING.to_string(),
        }
    }

    /// Progress record for the extractor's byte counter.
    pub fn downloading(downloaded_bytes: u64) -> Self {
        Self::Progress {
            status: format!("Download progress: {} bytes", downloaded_bytes),
        }
    }

    pub fn converting() -> Self {
        Self::Progress {
            status: STATUS_CONVERTING.to_string(),
        }
    }

    pub fn success(artifact: ArtifactRef) -> Self {
        Self::Success {
            status: STATUS_COMPLETED.to_string(),
            artifact,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            status: STATUS_FAILED.to_string(),
            error: error.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            JobRecord::Pending => JobState::Pending,
            JobRecord::Progress { .. } => JobState::Progress,
            JobRecord::Success { .. } => JobState::Success,
            JobRecord::Failure { .. } => JobState::Failure,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Human-readable status message.
    pub fn status(&self) -> &str {
        match self {
            JobRecord::Pending => STATUS_WAITING,
            JobRecord::Progress { status }
            | JobRecord::Success { status, .. }
            | JobRecord::Failure { status, .. } => status,
        }
    }
}

/// Queue payload handed from the dispatcher to the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Source video URL
    pub url: String,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            url: url.into(),
            created_at: Utc::now(),
        }
    }
}
