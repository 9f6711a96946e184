//! MP4 normalization through FFmpeg.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Re-encodes media into an MP4 container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` as H.264/AAC MP4 into `output`.
    async fn to_mp4(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// [`Transcoder`] backed by the `ffmpeg` command.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    timeout_secs: Option<u64>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg if a single conversion runs longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// The command used to convert `input` into `output`.
    pub fn command(input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_codec("libx264")
            .audio_codec("aac")
            .output_arg("-strict")
            .output_arg("experimental")
            .output_arg("-f")
            .output_arg("mp4")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_mp4(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let cmd = Self::command(input, output);

        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        info!(input = %input.display(), output = %output.display(), "Converting to MP4");
        runner.run(&cmd).await
    }
}
