//! HTTP surface: health, stats, metrics, and the notification publish
//! endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::notification::{NotificationRequest, RouterStats};
use crate::registry::RegistryStats;
use crate::server::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new().route("/notifications", post(publish_notification)),
        )
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: RegistryStats,
    pub notifications: RouterStats,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub id: Uuid,
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.registry.stats(),
        notifications: state.router.stats(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode() {
        Ok(output) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// POST /api/v1/notifications - publish a notification through the bus.
pub async fn publish_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<PublishResponse>, AppError> {
    // API key is optional; when configured, publishers must present it
    if let Some(expected) = state.settings.api.key.as_deref() {
        let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(AppError::Auth("Invalid or missing API key".to_string()));
        }
    }

    let record = state.bus.publish(&request).await?;
    Ok(Json(PublishResponse {
        id: record.id,
        status: "accepted".to_string(),
    }))
}
