//! Job status polling.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use vfetch_models::{JobId, JobRecord, JobState};

use crate::error::ApiResult;
use crate::state::AppState;

/// Flattened view of a job record.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub state: JobState,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobRecord> for StatusResponse {
    fn from(record: JobRecord) -> Self {
        let mut response = Self {
            state: record.state(),
            status: record.status().to_string(),
            filename: None,
            path: None,
            video_id: None,
            error: None,
        };

        match record {
            JobRecord::Success { artifact, .. } => {
                response.filename = Some(artifact.filename);
                response.path = Some(artifact.path);
                response.video_id = Some(artifact.video_id);
            }
            JobRecord::Failure { error, .. } => response.error = Some(error),
            JobRecord::Pending | JobRecord::Progress { .. } => {}
        }

        response
    }
}

/// Current state of a job. Unknown ids read as PENDING.
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let record = state
        .store
        .get(&JobId::from_string(task_id))
        .await?
        .unwrap_or(JobRecord::Pending);

    Ok(Json(record.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfetch_models::ArtifactRef;

    #[test]
    fn test_pending_response() {
        let response = StatusResponse::from(JobRecord::Pending);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "state": "PENDING",
                "status": "Task is waiting to be processed"
            })
        );
    }

    #[test]
    fn test_success_response_carries_artifact() {
        let response = StatusResponse::from(JobRecord::success(ArtifactRef {
            filename: "0123456789abcdef0123456789abcdef.mp4".to_string(),
            path: "cache/0123456789abcdef0123456789abcdef.mp4".to_string(),
            video_id: "dQw4w9WgXcQ".to_string(),
        }));

        assert_eq!(response.state, JobState::Success);
        assert_eq!(response.status, "completed");
        assert_eq!(
            response.filename.as_deref(),
            Some("0123456789abcdef0123456789abcdef.mp4")
        );
        assert_eq!(response.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_failure_response_carries_error() {
        let response = StatusResponse::from(JobRecord::failure("yt-dlp exited with status 1"));
        assert_eq!(response.state, JobState::Failure);
        assert_eq!(response.error.as_deref(), Some("yt-dlp exited with status 1"));
        assert!(response.filename.is_none());
    }
}
