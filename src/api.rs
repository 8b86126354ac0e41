//! HTTP serving layer: polling endpoints, status/metrics, and the SSE feed.
//!
//! Plumbing only — request validation happens here (the history window is
//! clamped before it ever reaches the store), and the core is read through
//! non-blocking snapshots.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::movement::MovementDirection;
use crate::records::DetectionRecord;
use crate::service::DetectionService;

pub fn router(service: Arc<DetectionService>) -> Router {
    let cors = cors_layer(&service.config().api.cors_origins);
    Router::new()
        .route("/", get(root))
        .route("/api/latest", get(latest))
        .route("/api/history", get(history))
        .route("/api/status", get(status))
        .route("/api/metrics", get(metrics))
        .route("/health", get(health))
        .route("/stream", get(stream_events))
        .layer(cors)
        .with_state(service)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

async fn root(State(service): State<Arc<DetectionService>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "herdwatch detection API",
        "source": service.source_kind(),
        "endpoints": {
            "latest": "/api/latest",
            "history": "/api/history?minutes=15",
            "status": "/api/status",
            "metrics": "/api/metrics",
            "stream": "/stream",
            "health": "/health",
        }
    }))
}

/// Latest record, or a zero-count placeholder while the first frame is
/// still on its way.
async fn latest(State(service): State<Arc<DetectionService>>) -> Json<DetectionRecord> {
    let record = service.latest().unwrap_or_else(|| DetectionRecord {
        timestamp: Utc::now(),
        object_count: 0,
        movement: MovementDirection::Stationary,
        throughput_fps: 0.0,
        source: service.source_kind(),
    });
    Json(record)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    minutes: Option<i64>,
}

async fn history(
    State(service): State<Arc<DetectionService>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DetectionRecord>>, ApiError> {
    let minutes = query.minutes.unwrap_or(15);
    let max = service.config().history.max_window_minutes;
    if minutes < 1 || minutes > max {
        return Err(ApiError::bad_request(format!(
            "minutes must be between 1 and {max}"
        )));
    }
    Ok(Json(service.history_minutes(minutes)))
}

async fn status(State(service): State<Arc<DetectionService>>) -> impl IntoResponse {
    Json(service.status())
}

async fn metrics(State(service): State<Arc<DetectionService>>) -> impl IntoResponse {
    Json(service.metrics())
}

async fn health(State(service): State<Arc<DetectionService>>) -> Json<serde_json::Value> {
    let status = service.status();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "detector_loaded": status.detector_loaded,
        "stream_active": status.stream_active,
    }))
}

/// Server-Sent Events feed: polls the latest record on a short fixed
/// interval and emits each new one once.
async fn stream_events(
    State(service): State<Arc<DetectionService>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::unfold(
        (service, None::<DateTime<Utc>>),
        |(service, last_seen)| async move {
            loop {
                if let Some(record) = service.latest() {
                    if last_seen.map_or(true, |t| record.timestamp > t) {
                        let timestamp = record.timestamp;
                        let event = Event::default()
                            .json_data(&record)
                            .unwrap_or_else(|_| Event::default());
                        return Some((Ok(event), (service, Some(timestamp))));
                    }
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Errors ──────────────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({
            "error": self.status.canonical_reason().unwrap_or("error"),
            "message": self.message,
            "timestamp": Utc::now(),
        }));
        (self.status, body).into_response()
    }
}
