//! Liveness endpoint for container orchestration

use crate::error::Result;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

pub async fn serve(port: u16) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/", get(index));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health check server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "nullmail-smtp" }))
}

async fn index() -> Json<Value> {
    Json(json!({ "service": "nullmail-smtp", "endpoints": ["/health"] }))
}
