//! Shared data models for the vfetch backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, states and status records
//! - Queue payloads handed to the worker pool
//! - Artifact naming and servable-name validation
//! - Video URL validation

pub mod artifact;
pub mod job;
pub mod utils;

// Re-export common types
pub use artifact::{
    artifact_filename, artifact_stem, is_valid_artifact_name, ArtifactRef, ARTIFACT_EXTENSION,
};
pub use job::{DownloadJob, JobId, JobRecord, JobState};
pub use utils::{extract_youtube_id, validate_video_url, UrlError, MAX_URL_LENGTH};
