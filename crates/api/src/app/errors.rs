use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use loglens_core::JobId;
use loglens_infra::{PipelineError, StoreError};

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    match err {
        PipelineError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        PipelineError::Busy { active } => json_error(
            StatusCode::CONFLICT,
            "busy",
            format!("job {active} is already processing"),
        ),
        PipelineError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        e @ PipelineError::InvalidState { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_state", e.to_string())
        }
        PipelineError::Store(StoreError::NotFound(what)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        PipelineError::Store(e) => {
            tracing::error!(error = %e, "store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        PipelineError::Scorer(e) => {
            json_error(StatusCode::BAD_GATEWAY, "scorer_error", e.to_string())
        }
        PipelineError::Broadcast(e) => {
            json_error(StatusCode::BAD_GATEWAY, "broadcast_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}
