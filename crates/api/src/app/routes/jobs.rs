use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::dto::{JobAccepted, ProcessQuery, ReportsQuery};
use crate::app::errors::{self, parse_job_id};
use crate::app::services::AppServices;

const DEFAULT_REPORT_LIMIT: usize = 50;

/// POST /v2/process?filename=...
///
/// Body is the raw log file. Responds `202 Accepted` once the job and its chunks exist.
pub async fn process(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ProcessQuery>,
    body: Bytes,
) -> axum::response::Response {
    let filename = query.filename.unwrap_or_default();
    match services.orchestrator.submit(&filename, &body).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobAccepted::from(job))).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.status(job_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn results(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.results(job_id).await {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.cancel(job_id).await {
        Ok(job) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "job_id": job.id,
                "status": job.status,
            })),
        )
            .into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn resume(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.resume(job_id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobAccepted::from(job))).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// GET /v2/reports?limit=N
pub async fn reports(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ReportsQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_REPORT_LIMIT);
    match services.orchestrator.reports(limit).await {
        Ok(reports) => (StatusCode::OK, Json(reports)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
