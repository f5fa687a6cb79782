//! Month Routes
//!
//! - GET /api/v1/months - Months present in the library, newest first
//! - GET /api/v1/months/:month_key/photos - A page of asset ids
//! - GET /api/v1/months/:month_key/count - Exact counts

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{MonthCountResponse, MonthListResponse, MonthPhotosResponse, PhotosQuery};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// GET /api/v1/months
pub async fn list_months(State(state): State<Arc<AppState>>) -> ApiResult<Json<MonthListResponse>> {
    let months = state.service.list_months().await?;

    Ok(Json(MonthListResponse {
        total: months.len(),
        months,
    }))
}

/// GET /api/v1/months/:month_key/photos?offset=&limit=
///
/// `offset` defaults to 0 and `limit` to the configured page size; range
/// checks happen in the query service. Non-integer values get the same error
/// body as every other rejection.
pub async fn month_photos(
    State(state): State<Arc<AppState>>,
    Path(month_key): Path<String>,
    query: Result<Query<PhotosQuery>, QueryRejection>,
) -> ApiResult<Json<MonthPhotosResponse>> {
    let Query(query) = query?;
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(state.config.default_page_size);

    let page = state
        .service
        .fetch_month_photos(&month_key, offset, limit)
        .await?;

    Ok(Json(MonthPhotosResponse::from_page(page, limit as u64)))
}

/// GET /api/v1/months/:month_key/count
pub async fn month_count(
    State(state): State<Arc<AppState>>,
    Path(month_key): Path<String>,
) -> ApiResult<Json<MonthCountResponse>> {
    let count = state.service.fetch_month_count(&month_key).await?;
    Ok(Json(count.into()))
}
