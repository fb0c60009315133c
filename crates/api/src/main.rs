#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loglens_observability::init();

    let app = loglens_api::app::build_app().await?;

    let bind = std::env::var("LOGLENS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind}: {e}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
