//! Service wiring: stores, broadcast, scorer and explanation provider behind one orchestrator.

use std::sync::Arc;

use anyhow::Context;

use loglens_ai::{
    ExplanationProvider, FallbackExplanationProvider, KeywordScorer, OllamaExplanationProvider,
};
use loglens_events::{BroadcastStore, InMemoryBroadcastStore};
use loglens_infra::{InMemoryChunkStore, InMemoryJobStore, JobOrchestrator, PipelineConfig};
#[cfg(feature = "redis")]
use loglens_infra::{
    PostgresChunkStore, PostgresJobStore, broadcast::RedisBroadcastStore, store::postgres::apply_schema,
};
#[cfg(feature = "redis")]
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: JobOrchestrator,
}

impl AppServices {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// In-memory stores with the given explanation provider (dev/test).
    pub fn in_memory(config: PipelineConfig, explainer: Arc<dyn ExplanationProvider>) -> Self {
        let broadcast: Arc<dyn BroadcastStore> = Arc::new(InMemoryBroadcastStore::new());
        Self::new(JobOrchestrator::new(
            InMemoryJobStore::arc(),
            InMemoryChunkStore::arc(),
            Arc::new(KeywordScorer),
            explainer,
            broadcast,
            config,
        ))
    }
}

/// Build services from the environment.
pub async fn build_services() -> anyhow::Result<AppServices> {
    let config = PipelineConfig::from_env();
    let explainer = build_explainer()?;

    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config, explainer).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(AppServices::in_memory(config, explainer))
}

fn build_explainer() -> anyhow::Result<Arc<dyn ExplanationProvider>> {
    match std::env::var("OLLAMA_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3".to_string());
            let provider = OllamaExplanationProvider::new(&url, model)
                .with_context(|| format!("failed to build explanation client for {url}"))?;
            tracing::info!(endpoint = %provider.endpoint(), "using ollama explanations");
            Ok(Arc::new(provider))
        }
        _ => {
            tracing::info!("OLLAMA_URL not set; using built-in explanations");
            Ok(Arc::new(FallbackExplanationProvider))
        }
    }
}

#[cfg(feature = "redis")]
async fn build_persistent_services(
    config: PipelineConfig,
    explainer: Arc<dyn ExplanationProvider>,
) -> anyhow::Result<AppServices> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    apply_schema(&pool).await.context("failed to apply schema")?;

    let broadcast = RedisBroadcastStore::new(&redis_url).context("failed to create Redis broadcast store")?;

    tracing::info!("using Postgres stores and Redis broadcast");
    Ok(AppServices::new(JobOrchestrator::new(
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(PostgresChunkStore::new(pool)),
        Arc::new(KeywordScorer),
        explainer,
        Arc::new(broadcast),
        config,
    )))
}
