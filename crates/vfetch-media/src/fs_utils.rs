//! Filesystem helpers for publishing artifacts.
//!
//! Files become visible under their final name in a single rename, so a
//! reader never observes a partially written artifact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Move `src` to `dst`, replacing `dst` if it exists.
///
/// Tries a plain rename first. Across filesystems (EXDEV) the file is copied
/// next to `dst` under a temporary name and then renamed into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_then_rename(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a file, treating "already gone" as success.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Set the modification time of `path` to now.
pub async fn touch(path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(|e| MediaError::internal(format!("touch task failed: {}", e)))??;
    Ok(())
}

/// EXDEV is errno 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

fn sibling_temp_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dst.with_file_name(name)
}

async fn copy_then_rename(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp = sibling_temp_path(dst);

    if let Err(e) = fs::copy(src, &tmp).await {
        remove_if_exists(&tmp).await.ok();
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp, dst).await {
        remove_if_exists(&tmp).await.ok();
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after cross-device move: {}", src.display(), e);
    }

    Ok(())
}
