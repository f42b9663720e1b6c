//! Probe and metrics HTTP server.
//!
//! `/healthz` answers as long as the process serves HTTP, `/readyz` once the
//! watcher has verified it can list what it watches, `/metrics` renders the
//! Prometheus registry.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

/// State shared between the controller and the probe handlers
#[derive(Debug, Clone)]
pub struct ProbeState {
    metrics: Metrics,
    ready: Arc<AtomicBool>,
}

impl ProbeState {
    /// Probe state reporting not ready until [`ProbeState::set_ready`] is called
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the controller ready (or not)
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Mark `state` ready once `check` succeeds; a failed check leaves it unready
pub async fn ready_after<E>(
    state: &ProbeState,
    check: impl Future<Output = Result<(), E>>,
) -> Result<(), E> {
    check.await?;
    state.set_ready(true);
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "starting" }),
        )
    }
}

async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Router serving the probe and metrics endpoints
pub fn build_router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the probe router on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Watch(format!("Failed to bind probe server to {addr}: {e}")))?;
    info!("Probe server listening on {}", addr);

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ControllerError::Watch(format!("Probe server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_is_always_ok() {
        let state = ProbeState::new(Metrics::new().unwrap());
        let (status, body) = get_path(build_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_readyz_follows_ready_flag() {
        let state = ProbeState::new(Metrics::new().unwrap());

        let (status, _) = get_path(build_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let (status, body) = get_path(build_router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ready"}"#);
    }

    #[tokio::test]
    async fn test_ready_only_after_successful_check() {
        let state = ProbeState::new(Metrics::new().unwrap());

        let denied = ready_after(&state, async { Err::<(), _>("forbidden") }).await;
        assert_eq!(denied, Err("forbidden"));
        let (status, _) = get_path(build_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        ready_after(&state, async { Ok::<(), &str>(()) }).await.unwrap();
        let (status, _) = get_path(build_router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_renders_registry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_child_operation("CronJob", "created");
        let state = ProbeState::new(metrics);

        let (status, body) = get_path(build_router(state), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"promptfoo_child_operations_total{child="CronJob",operation="created"} 1"#));
    }
}
