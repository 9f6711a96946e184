//! Video download using yt-dlp.
//!
//! yt-dlp is driven as an opaque external command. Progress and the final
//! output location are read back from tagged lines it prints while running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_extractor_line, DownloadProgress, ExtractorLine, PROGRESS_TAG, RESULT_TAG};

/// Best video+audio as MP4 when available, else best overall.
pub const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMedia {
    /// Source-site video identifier
    pub video_id: String,
    /// Downloaded file, named from the output template
    pub path: PathBuf,
}

impl ExtractedMedia {
    /// Whether the file already has an `.mp4` extension.
    pub fn is_mp4(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
    }
}

/// Fetches a video from a URL into a local file.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download `url` to a file named by `output_template` (yt-dlp template
    /// syntax). Progress is published on `progress`; the sender is dropped
    /// when extraction ends so receivers observe the channel closing.
    async fn extract(
        &self,
        url: &str,
        output_template: &Path,
        progress: watch::Sender<DownloadProgress>,
    ) -> MediaResult<ExtractedMedia>;
}

/// [`Extractor`] backed by the `yt-dlp` command.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    format: String,
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
        }
    }

    /// Override the format selector.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Build the yt-dlp argument list.
    pub fn build_args(&self, url: &str, output_template: &Path) -> Vec<String> {
        vec![
            "--no-playlist".to_string(),
            // File age drives cache eviction, so never copy Last-Modified
            "--no-mtime".to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s",
                PROGRESS_TAG
            ),
            "--no-simulate".to_string(),
            "--print".to_string(),
            format!("after_move:{} %(id)s %(filepath)s", RESULT_TAG),
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
            "--".to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        url: &str,
        output_template: &Path,
        progress: watch::Sender<DownloadProgress>,
    ) -> MediaResult<ExtractedMedia> {
        check_ytdlp()?;

        info!(url = %url, output = %output_template.display(), "Downloading video");

        let mut child = Command::new("yt-dlp")
            .args(self.build_args(url, output_template))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("yt-dlp stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("yt-dlp stderr not captured"))?;

        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        let mut finished: Option<ExtractedMedia> = None;
        let mut last_error: Option<String> = None;

        // Either stream may carry the tagged lines depending on yt-dlp's
        // quiet mode, so both are parsed.
        while stdout_open || stderr_open {
            let (line, from_stderr) = tokio::select! {
                line = stdout.next_line(), if stdout_open => (line?, false),
                line = stderr.next_line(), if stderr_open => (line?, true),
            };

            let Some(line) = line else {
                if from_stderr {
                    stderr_open = false;
                } else {
                    stdout_open = false;
                }
                continue;
            };

            match parse_extractor_line(&line) {
                Some(ExtractorLine::Progress(p)) => {
                    progress.send_replace(p);
                }
                Some(ExtractorLine::Finished { video_id, path }) => {
                    finished = Some(ExtractedMedia { video_id, path });
                }
                None if from_stderr && !line.trim().is_empty() => {
                    debug!("yt-dlp: {}", line);
                    last_error = Some(line.trim().to_string());
                }
                None => {}
            }
        }

        let status = child.wait().await?;

        if !status.success() {
            let error_msg = last_error.unwrap_or_else(|| "Unknown error".to_string());
            warn!(url = %url, "yt-dlp exited with {}: {}", status, error_msg);
            return Err(MediaError::download_failed(format!(
                "yt-dlp failed: {}",
                error_msg
            )));
        }

        let media = finished
            .ok_or_else(|| MediaError::download_failed("yt-dlp did not report an output file"))?;

        if !tokio::fs::try_exists(&media.path).await? {
            return Err(MediaError::FileNotFound(media.path));
        }

        info!(
            url = %url,
            video_id = %media.video_id,
            output = %media.path.display(),
            "Downloaded video successfully"
        );

        Ok(media)
    }
}
