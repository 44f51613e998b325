use anyhow::{Context, Result};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn init_tracing() {
    tracing_subscriber::fmt().init();
}

pub fn init_env() {
    // Missing .env is fine in production, variables come from the runtime.
    dotenvy::dotenv().ok();
}

pub async fn serve(service_name: &str, app: Router, bind_addr: &str) -> Result<()> {
    let app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("{service_name} listening on {bind_addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
