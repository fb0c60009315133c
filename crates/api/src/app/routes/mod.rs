use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod stream;
pub mod system;

/// Router for the job pipeline endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/v2/process", post(jobs::process))
        .route("/v2/status/:job_id", get(jobs::status))
        .route("/v2/results/:job_id", get(jobs::results))
        .route("/v2/results/:job_id/stream", get(stream::stream_job))
        .route("/v2/cancel/:job_id", post(jobs::cancel))
        .route("/v2/resume/:job_id", post(jobs::resume))
        .route("/v2/reports", get(jobs::reports))
}
