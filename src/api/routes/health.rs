//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (asset source reachable)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;
use crate::listener::ListenerState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if check_source_health(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let source_ok = check_source_health(&state).await;
    let listener = state.listener.as_ref().map(|l| l.state());

    let listener_ok = !matches!(listener, Some(ListenerState::Unsubscribed));
    let listener_status = match listener {
        None => "disabled",
        Some(ListenerState::Unsubscribed) => "unsubscribed",
        Some(_) => "ok",
    };

    let status = match (source_ok, listener_ok) {
        (true, true) => "healthy",
        (false, false) => "unhealthy",
        _ => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        source: if source_ok { "ok" } else { "error" }.to_string(),
        listener: listener_status.to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// A single-row month listing is the cheapest read every source supports
async fn check_source_health(state: &AppState) -> bool {
    match state.service.index().adapter().list_months(1).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Asset source health check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let status = liveness().await;
        assert_eq!(status, StatusCode::OK);
    }
}
