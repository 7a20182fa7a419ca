use crate::cache::SnapshotCache;
use crate::state::{round_to, Snapshot};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct HttpAppState {
    pub cache: Arc<SnapshotCache>,
}

#[derive(Debug, serde::Serialize)]
struct StatusResponse<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    collected_at: String,
    cache_age_s: f64,
}

#[derive(Debug, serde::Serialize)]
struct StatusSummary {
    status: &'static str,
    primary_app_sessions: u64,
    terminal_sessions: u64,
    cpu_percent: f64,
    memory_percent: f64,
}

pub fn build_router(cache: Arc<SnapshotCache>) -> Router {
    // The portal page reads /api/v1/status cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/status/summary", get(summary_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HttpAppState { cache })
        .layer(cors)
}

async fn status_handler(State(state): State<HttpAppState>) -> Response {
    let (entry, age) = state.cache.read().await;
    let secs = entry.snapshot.timestamp.max(0) as u64;
    let collected_at =
        humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(secs)).to_string();
    Json(StatusResponse {
        snapshot: &entry.snapshot,
        collected_at,
        cache_age_s: age_secs(age),
    })
    .into_response()
}

async fn summary_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let (entry, _) = state.cache.read().await;
    let s = &entry.snapshot;
    Json(StatusSummary {
        status: "ok",
        primary_app_sessions: s.sessions.primary_app_count,
        terminal_sessions: s.sessions.terminal_count,
        cpu_percent: s.cpu.percent,
        memory_percent: s.memory.percent,
    })
}

async fn health_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let age = state.cache.age().await;
    Json(json!({ "status": "ok", "cache_age_s": age_secs(age) }))
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    let encoded = state.cache.read_exposition().await;
    let mut response = Response::new(Body::from(encoded));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

fn age_secs(age: Duration) -> f64 {
    round_to(age.as_secs_f64(), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DiskInfo, ProcessSample};
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Option<HeaderValue>, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, bytes.to_vec())
    }

    async fn populated_cache() -> Arc<SnapshotCache> {
        let cache = Arc::new(SnapshotCache::new());
        let mut snapshot = Snapshot {
            timestamp: 1_700_000_000,
            hostname: Some("node-1".to_string()),
            ..Snapshot::default()
        };
        snapshot.sessions.primary_app_count = 4;
        snapshot.sessions.terminal_count = 1;
        snapshot.cpu.percent = 12.5;
        snapshot.memory.percent = 40.0;
        snapshot
            .disks
            .insert("data".to_string(), DiskInfo::unavailable());
        snapshot.top_processes.push(ProcessSample {
            label: "Session 1".to_string(),
            cpu_percent: 9.5,
            memory_mb: 120.0,
            age_minutes: 3,
        });
        cache
            .write(snapshot, b"telemetry_app_sessions 4\n".to_vec())
            .await;
        cache
    }

    #[tokio::test]
    async fn status_returns_snapshot_with_age() {
        let app = build_router(populated_cache().await);
        let (status, _, body) = get_body(app, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000);
        assert_eq!(json["hostname"], "node-1");
        assert_eq!(json["sessions"]["primary_app_count"], 4);
        assert_eq!(json["disks"]["data"], json!({ "available": false }));
        assert_eq!(json["top_processes"][0]["label"], "Session 1");
        assert_eq!(json["collected_at"], "2023-11-14T22:13:20Z");
        assert!(json["cache_age_s"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn api_alias_serves_same_document() {
        let cache = populated_cache().await;
        let (_, _, a) = get_body(build_router(cache.clone()), "/status").await;
        let (_, _, b) = get_body(build_router(cache), "/api/v1/status").await;
        let a: serde_json::Value = serde_json::from_slice(&a).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&b).unwrap();
        assert_eq!(a["sessions"], b["sessions"]);
        assert_eq!(a["timestamp"], b["timestamp"]);
    }

    #[tokio::test]
    async fn cross_origin_get_is_allowed() {
        let app = build_router(populated_cache().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .header("origin", "https://portal.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn cors_preflight_allows_get() {
        let app = build_router(Arc::new(SnapshotCache::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/status")
                    .header("origin", "https://portal.example")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        let methods = headers
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(methods.contains("GET"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_router(Arc::new(SnapshotCache::new()));
        let (status, _, body) = get_body(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["cache_age_s"].is_number());
    }

    #[tokio::test(start_paused = true)]
    async fn health_age_tracks_last_write() {
        let cache = populated_cache().await;
        tokio::time::advance(Duration::from_millis(2_500)).await;
        let (_, _, body) = get_body(build_router(cache), "/api/v1/health").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["cache_age_s"], 2.5);
    }

    #[tokio::test]
    async fn summary_is_compact() {
        let app = build_router(populated_cache().await);
        let (_, _, body) = get_body(app, "/status/summary").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            json!({
                "status": "ok",
                "primary_app_sessions": 4,
                "terminal_sessions": 1,
                "cpu_percent": 12.5,
                "memory_percent": 40.0,
            })
        );
    }

    #[tokio::test]
    async fn metrics_serves_cached_bytes_verbatim() {
        let app = build_router(populated_cache().await);
        let (status, content_type, body) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            content_type.unwrap(),
            HeaderValue::from_static("text/plain; version=0.0.4")
        );
        assert_eq!(body, b"telemetry_app_sessions 4\n".to_vec());
    }
}
