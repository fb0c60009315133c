//! Per-job progress stream over Server-Sent Events.
//!
//! The first frame is the job's last known state (`state`), followed by one frame per
//! progress event named after its type. The stream closes once the job is settled.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

use loglens_infra::JobUpdate;

use crate::app::errors::{self, parse_job_id};
use crate::app::services::AppServices;

/// GET /v2/results/{job_id}/stream
pub async fn stream_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let updates = match services.orchestrator.subscribe(job_id).await {
        Ok(u) => u,
        Err(e) => return errors::pipeline_error_to_response(e),
    };

    let stream = UnboundedReceiverStream::new(updates.into_inner())
        .filter_map(|update| to_sse(&update).map(Ok::<_, Infallible>));

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn to_sse(update: &JobUpdate) -> Option<SseEvent> {
    let (name, data) = match update {
        JobUpdate::Snapshot(state) => ("state", serde_json::to_string(state)),
        JobUpdate::Event(envelope) => (envelope.event().event_type(), serde_json::to_string(envelope)),
    };
    match data {
        Ok(json) => Some(SseEvent::default().event(name).data(json)),
        Err(e) => {
            tracing::warn!(error = %e, "dropping unserializable stream frame");
            None
        }
    }
}
