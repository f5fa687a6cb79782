//! Index Routes
//!
//! - GET /api/v1/index/stats - Bucket and listener counters
//! - POST /api/v1/index/trim - Evict least recently used buckets

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{IndexStatsResponse, TrimRequest, TrimResponse};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// GET /api/v1/index/stats
pub async fn index_stats(State(state): State<Arc<AppState>>) -> Json<IndexStatsResponse> {
    let index = state.service.stats().await;
    let listener = state.listener.as_ref().map(|l| l.stats());

    Json(IndexStatsResponse { index, listener })
}

/// POST /api/v1/index/trim
///
/// Accepts an empty body, in which case the service's bucket budget applies.
pub async fn trim_index(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TrimRequest>>,
) -> ApiResult<Json<TrimResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let evicted = match request.max_buckets {
        Some(max) => state.service.index().relieve_memory_pressure(max).await,
        None => state.service.relieve_memory_pressure().await,
    };
    let remaining = state.service.stats().await.buckets;

    tracing::info!(evicted, remaining, "Trimmed month index");

    Ok(Json(TrimResponse { evicted, remaining }))
}
