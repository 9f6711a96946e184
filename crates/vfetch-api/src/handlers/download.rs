//! Download submission.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub message: String,
    pub task_id: String,
}

/// Validate the URL and queue a download job.
///
/// Returns as soon as the job is queued; progress is read via the status
/// endpoint.
pub async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DownloadResponse>)> {
    let Json(request) = payload.map_err(|e| {
        debug!("Rejected download body: {}", e);
        ApiError::bad_request("Invalid request body")
    })?;

    let url = request.url.unwrap_or_default();
    let job_id = state.dispatcher.submit(&url).await?;
    metrics::record_job_enqueued();

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            message: "Download started".to_string(),
            task_id: job_id.to_string(),
        }),
    ))
}
