//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.

use serde::{Deserialize, Serialize};

use crate::index::IndexStats;
use crate::listener::ListenerStats;
use crate::month::MonthKey;
use crate::service::{MonthCount, MonthPage, MonthSummary};

// ============================================
// MONTH DTOs
// ============================================

/// Query string of `GET /months/:month_key/photos`
#[derive(Debug, Default, Deserialize)]
pub struct PhotosQuery {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Months present in the library
#[derive(Debug, Serialize, Deserialize)]
pub struct MonthListResponse {
    pub total: usize,
    pub months: Vec<MonthSummary>,
}

/// One page of a month
#[derive(Debug, Serialize, Deserialize)]
pub struct MonthPhotosResponse {
    pub month_key: MonthKey,
    pub offset: u64,
    pub limit: u64,
    pub ids: Vec<String>,
    pub has_more: bool,
}

impl MonthPhotosResponse {
    pub fn from_page(page: MonthPage, limit: u64) -> Self {
        Self {
            month_key: page.month,
            offset: page.offset,
            limit,
            ids: page.ids,
            has_more: page.has_more,
        }
    }
}

/// Counts of a month
#[derive(Debug, Serialize, Deserialize)]
pub struct MonthCountResponse {
    pub month_key: MonthKey,
    pub total: u64,
    pub photos: u64,
    pub videos: u64,
}

impl From<MonthCount> for MonthCountResponse {
    fn from(count: MonthCount) -> Self {
        Self {
            month_key: count.month,
            total: count.total,
            photos: count.photos,
            videos: count.videos,
        }
    }
}

// ============================================
// INDEX DTOs
// ============================================

#[derive(Debug, Serialize)]
pub struct IndexStatsResponse {
    pub index: IndexStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerStats>,
}

/// Body of `POST /index/trim`; the service budget applies when omitted
#[derive(Debug, Default, Deserialize)]
pub struct TrimRequest {
    #[serde(default)]
    pub max_buckets: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrimResponse {
    pub evicted: usize,
    pub remaining: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, unhealthy
    pub status: String,
    /// Asset source status
    pub source: String,
    /// Listener status, "disabled" when none is attached
    pub listener: String,
    pub uptime_seconds: u64,
    pub version: String,
}
