//! Artifact naming.
//!
//! Cached artifacts are named `<stem>.mp4` where the stem is 32 lowercase hex
//! characters derived from the source video identifier. The same rule backs
//! the filename check on the serving path, so every completed artifact is
//! servable and nothing else in the cache directory is.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Extension of every canonical artifact.
pub const ARTIFACT_EXTENSION: &str = "mp4";

/// Length of the hex stem.
pub const ARTIFACT_STEM_LEN: usize = 32;

static ARTIFACT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}(\.[a-zA-Z0-9]+)?$").unwrap());

/// Reference to a finished artifact, stored in SUCCESS records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Bare file name, accepted by the serving path
    pub filename: String,
    /// Path relative to the application base directory
    pub path: String,
    /// Source-site video identifier
    pub video_id: String,
}

/// Hex stem for a source video identifier.
pub fn artifact_stem(video_id: &str) -> String {
    let digest = Sha256::digest(video_id.as_bytes());
    digest[..ARTIFACT_STEM_LEN / 2]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Canonical artifact file name for a source video identifier.
pub fn artifact_filename(video_id: &str) -> String {
    format!("{}.{}", artifact_stem(video_id), ARTIFACT_EXTENSION)
}

/// Validate a client-supplied artifact name.
///
/// Traversal characters are rejected before the pattern is consulted.
pub fn is_valid_artifact_name(name: &str) -> bool {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return false;
    }
    ARTIFACT_NAME.is_match(name)
}
