//! External media tool wrappers.
//!
//! This crate provides:
//! - Video download via yt-dlp with progress streaming
//! - FFmpeg command building and execution
//! - MP4 normalization
//! - Cross-device file moves

pub mod command;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{ExtractedMedia, Extractor, YtDlpExtractor, DEFAULT_FORMAT};
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use progress::DownloadProgress;
pub use transcode::{FfmpegTranscoder, Transcoder};
