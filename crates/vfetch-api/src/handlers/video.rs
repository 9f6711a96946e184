//! Artifact download.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::resolve_artifact_path;
use crate::state::AppState;

/// Stream a cached artifact as an attachment.
pub async fn get_video(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request: Request,
) -> ApiResult<Response<Body>> {
    let path = resolve_artifact_path(&state.config.cache_dir, &filename).await?;

    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to serve file: {}", e)))?;

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
            .map_err(|e| ApiError::internal(e.to_string()))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);

        info!(filename = %filename, "Serving artifact");
        metrics::record_video_served();
    }

    Ok(response)
}
