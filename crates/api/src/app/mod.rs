//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: orchestrator wiring (stores, broadcast, scorer, explanations)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from environment-configured services (used by `main.rs`).
pub async fn build_app() -> anyhow::Result<Router> {
    let services = services::build_services().await?;
    Ok(build_app_with(services))
}

/// Build the router around already-wired services.
pub fn build_app_with(services: services::AppServices) -> Router {
    let body_limit = usize::try_from(services.orchestrator.config().max_upload_bytes)
        .unwrap_or(usize::MAX);
    let services = Arc::new(services);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/v2/active", get(routes::system::active))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}
