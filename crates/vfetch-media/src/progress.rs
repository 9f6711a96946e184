//! yt-dlp progress and result line parsing.
//!
//! The extractor is asked to print machine-readable lines via
//! `--progress-template` and `--print`, tagged with [`PROGRESS_TAG`] and
//! [`RESULT_TAG`] so they can be told apart from ordinary log output.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Prefix of progress lines.
pub const PROGRESS_TAG: &str = "vfetch-progress";
/// Prefix of the final result line.
pub const RESULT_TAG: &str = "vfetch-result";

/// Download progress reported by the extractor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Bytes downloaded so far (0 when the extractor does not know)
    pub downloaded_bytes: u64,
    /// Total size, when known
    pub total_bytes: Option<u64>,
}

/// A recognized extractor output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorLine {
    Progress(DownloadProgress),
    /// Final video id and on-disk path after post-processing
    Finished { video_id: String, path: PathBuf },
}

/// Parse one line of extractor output. Unrecognized lines yield `None`.
pub fn parse_extractor_line(line: &str) -> Option<ExtractorLine> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
        let mut fields = rest.split_whitespace();
        let downloaded_bytes = fields.next().and_then(parse_count).unwrap_or(0);
        let total_bytes = fields.next().and_then(parse_count);
        return Some(ExtractorLine::Progress(DownloadProgress {
            downloaded_bytes,
            total_bytes,
        }));
    }

    if let Some(rest) = line.strip_prefix(RESULT_TAG) {
        // The path may contain spaces; the id never does.
        let (video_id, path) = rest.trim_start().split_once(' ')?;
        if video_id.is_empty() || path.is_empty() {
            return None;
        }
        return Some(ExtractorLine::Finished {
            video_id: video_id.to_string(),
            path: PathBuf::from(path),
        });
    }

    None
}

/// yt-dlp prints "NA" for unknown fields and may emit floats for byte counts.
fn parse_count(value: &str) -> Option<u64> {
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_extractor_line("vfetch-progress 1048576 5242880"),
            Some(ExtractorLine::Progress(DownloadProgress {
                downloaded_bytes: 1_048_576,
                total_bytes: Some(5_242_880),
            }))
        );
    }

    #[test]
    fn test_unknown_counts_default_to_zero() {
        assert_eq!(
            parse_extractor_line("vfetch-progress NA NA"),
            Some(ExtractorLine::Progress(DownloadProgress::default()))
        );
        assert_eq!(
            parse_extractor_line("vfetch-progress 2048.0 NA"),
            Some(ExtractorLine::Progress(DownloadProgress {
                downloaded_bytes: 2048,
                total_bytes: None,
            }))
        );
    }

    #[test]
    fn test_parse_result_with_spaces_in_path() {
        assert_eq!(
            parse_extractor_line("vfetch-result dQw4w9WgXcQ /srv/cache/staging abc.webm"),
            Some(ExtractorLine::Finished {
                video_id: "dQw4w9WgXcQ".to_string(),
                path: PathBuf::from("/srv/cache/staging abc.webm"),
            })
        );
    }

    #[test]
    fn test_other_lines_ignored() {
        assert_eq!(parse_extractor_line("[youtube] dQw4w9WgXcQ: Downloading webpage"), None);
        assert_eq!(parse_extractor_line("vfetch-result dQw4w9WgXcQ"), None);
        assert_eq!(parse_extractor_line(""), None);
    }
}
