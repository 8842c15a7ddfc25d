//! Webhook endpoint for OHT notifications.

use crate::error::{ErrorKind, GatewayError};
use crate::gateway::{CallbackFields, Gateway, NotificationOutcome};
use anyhow::{Context, Result};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    translator_available: bool,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/oht/callback",
            get(callback_from_query).post(callback_from_form),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Bind to `0.0.0.0:{PORT}` and serve until the process stops.
pub async fn serve(gateway: Arc<Gateway>) -> Result<()> {
    let port = gateway.config().port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind webhook server to port {}", port))?;
    serve_on(listener, gateway).await
}

/// Serve the webhook router on an already bound listener.
pub async fn serve_on(listener: TcpListener, gateway: Arc<Gateway>) -> Result<()> {
    info!("Listening for OHT callbacks on {}", listener.local_addr()?);
    axum::serve(listener, router(gateway))
        .await
        .context("Webhook server stopped")?;
    Ok(())
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        translator_available: gateway.check_available(),
    })
}

async fn callback_from_form(
    State(gateway): State<Arc<Gateway>>,
    Form(fields): Form<CallbackFields>,
) -> (StatusCode, &'static str) {
    handle_callback(&gateway, &fields).await
}

async fn callback_from_query(
    State(gateway): State<Arc<Gateway>>,
    Query(fields): Query<CallbackFields>,
) -> (StatusCode, &'static str) {
    handle_callback(&gateway, &fields).await
}

async fn handle_callback(gateway: &Gateway, fields: &CallbackFields) -> (StatusCode, &'static str) {
    match gateway.handle_notification(fields).await {
        Ok(NotificationOutcome::Ignored) => (StatusCode::OK, "ignored"),
        Ok(NotificationOutcome::Retrieved(_)) => (StatusCode::OK, "ok"),
        Err(e) => status_for(&e),
    }
}

fn status_for(err: &GatewayError) -> (StatusCode, &'static str) {
    match err.kind() {
        ErrorKind::Auth | ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not found"),
        _ => {
            error!("OHT callback failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
