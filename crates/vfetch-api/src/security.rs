//! Path resolution for served artifacts.
//!
//! A requested name must pass [`is_valid_artifact_name`] before the
//! filesystem is touched, and the resolved file must still sit inside the
//! cache directory once symlinks and relative components are resolved.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;
use vfetch_models::is_valid_artifact_name;

use crate::error::{ApiError, ApiResult};

/// Resolve `filename` to a file inside `cache_dir`.
///
/// Invalid names and anything escaping the cache directory are rejected as
/// bad requests; a missing file is not found.
pub async fn resolve_artifact_path(cache_dir: &Path, filename: &str) -> ApiResult<PathBuf> {
    if !is_valid_artifact_name(filename) {
        return Err(ApiError::bad_request("Invalid filename"));
    }

    let root = match tokio::fs::canonicalize(cache_dir).await {
        Ok(root) => root,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => return Err(e.into()),
    };

    let resolved = match tokio::fs::canonicalize(root.join(filename)).await {
        Ok(path) => path,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => return Err(e.into()),
    };

    if !resolved.starts_with(&root) {
        warn!(filename = %filename, "Artifact path escapes cache directory");
        return Err(ApiError::bad_request("Invalid file path"));
    }

    if !tokio::fs::metadata(&resolved).await?.is_file() {
        return Err(ApiError::not_found("File not found"));
    }

    Ok(resolved)
}
