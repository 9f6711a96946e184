//! URL validation and video id extraction.
//!
//! The dispatcher and the HTTP layer share these checks so that a URL refused
//! by one is refused by the other.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Longest URL accepted for submission.
pub const MAX_URL_LENGTH: usize = 2048;

/// Recognized video-host pattern. Anchored at the start only; trailing query
/// parameters are allowed.
static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/(watch\?v=|embed/|v/|.+\?v=)?([^&=%\?]{11})",
    )
    .unwrap()
});

/// Errors returned by [`validate_video_url`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// No URL provided (absent or blank)
    #[error("URL is required")]
    Missing,
    #[error("URL exceeds {} characters", MAX_URL_LENGTH)]
    TooLong,
    /// Not an absolute http(s) URL with a host
    #[error("Invalid URL format")]
    InvalidScheme,
    /// URL is not from a recognized video host
    #[error("Invalid or unsupported video URL")]
    UnsupportedUrl,
}

/// Validate a submitted video URL, returning the trimmed URL.
pub fn validate_video_url(url: &str) -> Result<String, UrlError> {
    let url = url.trim();

    if url.is_empty() {
        return Err(UrlError::Missing);
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(UrlError::TooLong);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(UrlError::InvalidScheme);
    }
    match Url::parse(url) {
        Ok(parsed) if parsed.host_str().is_some() => {}
        _ => return Err(UrlError::InvalidScheme),
    }
    if !VIDEO_URL.is_match(url) {
        return Err(UrlError::UnsupportedUrl);
    }

    Ok(url.to_string())
}

/// Best-effort 11-character video id, used for log context before the
/// extractor reports the authoritative id.
pub fn extract_youtube_id(url: &str) -> Option<String> {
    let url = url.trim();

    let candidate = VIDEO_URL
        .captures(url)
        .and_then(|caps| caps.get(6))
        .map(|m| m.as_str().to_string())
        .filter(|id| is_valid_youtube_id(id));
    if candidate.is_some() {
        return candidate;
    }

    // /shorts/ paths are accepted by the pattern but the capture lands on the
    // path segment itself.
    let start = url.find("/shorts/")? + "/shorts/".len();
    let segment = &url[start..];
    let end = segment
        .find(|c| matches!(c, '&' | '#' | '?' | '/'))
        .unwrap_or(segment.len());
    let id = &segment[..end];
    is_valid_youtube_id(id).then(|| id.to_string())
}

fn is_valid_youtube_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
