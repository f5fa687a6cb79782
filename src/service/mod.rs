//! Query Service - the public month queries
//!
//! - `fetch_month_photos(month_key, offset, limit)`: a page of asset ids
//! - `fetch_month_count(month_key)`: exact counts for a month
//! - `list_months()`: months present in the library, newest first
//!
//! Inputs are validated before the index or the source is touched. The service
//! never writes to the library; its only side effects are the index's cache and
//! an optional background prefetch of the following page.

mod error;

pub use error::{QueryError, QueryResult};

use crate::index::{IndexStats, MonthIndex};
use crate::month::MonthKey;
use serde::{Deserialize, Serialize};

/// Configuration for the query service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Largest accepted `limit`
    pub max_page_size: usize,
    /// Pages to load ahead of a served page (0 disables)
    pub prefetch_pages: usize,
    /// Most months returned by `list_months`
    pub month_list_cap: usize,
    /// Bucket budget used by `relieve_memory_pressure`
    pub max_buckets: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_page_size: 500,
            prefetch_pages: 1,
            month_list_cap: 240,
            max_buckets: 48,
        }
    }
}

/// A page of one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthPage {
    pub month: MonthKey,
    pub offset: u64,
    pub ids: Vec<String>,
    pub has_more: bool,
}

/// Counts for one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCount {
    pub month: MonthKey,
    pub total: u64,
    pub photos: u64,
    pub videos: u64,
}

/// A month present in the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub month_key: MonthKey,
    pub year: i32,
    pub month: u32,
    pub display_name: String,
}

impl From<MonthKey> for MonthSummary {
    fn from(key: MonthKey) -> Self {
        Self {
            month_key: key,
            year: key.year(),
            month: key.month(),
            display_name: key.display_name(),
        }
    }
}

/// Validates requests and answers them from the month index
pub struct QueryService {
    index: MonthIndex,
    config: ServiceConfig,
}

impl QueryService {
    pub fn new(index: MonthIndex, config: ServiceConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &MonthIndex {
        &self.index
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Ids `offset..offset+limit` of a month, newest first
    pub async fn fetch_month_photos(
        &self,
        month_key: &str,
        offset: i64,
        limit: i64,
    ) -> QueryResult<MonthPage> {
        let month = MonthKey::decode(month_key)?;
        let (offset, limit) = self.validate_window(offset, limit)?;

        let slice = self.index.page(month, offset, limit).await?;

        if slice.has_more && self.config.prefetch_pages > 0 {
            let through = offset
                .saturating_add(limit.saturating_mul(self.config.prefetch_pages + 1))
                .saturating_add(1);
            self.prefetch(month, through);
        }

        tracing::debug!(month = %month, offset, limit, returned = slice.ids.len(), "Served month page");

        Ok(MonthPage {
            month,
            offset: offset as u64,
            ids: slice.ids,
            has_more: slice.has_more,
        })
    }

    /// Exact counts for a month
    pub async fn fetch_month_count(&self, month_key: &str) -> QueryResult<MonthCount> {
        let month = MonthKey::decode(month_key)?;
        let counts = self.index.count(month).await?;

        Ok(MonthCount {
            month,
            total: counts.total,
            photos: counts.photos,
            videos: counts.videos,
        })
    }

    /// Months present in the library, newest first
    pub async fn list_months(&self) -> QueryResult<Vec<MonthSummary>> {
        let months = self
            .index
            .adapter()
            .list_months(self.config.month_list_cap)
            .await?;
        Ok(months.into_iter().map(MonthSummary::from).collect())
    }

    /// Evict buckets down to the configured budget; returns how many went
    pub async fn relieve_memory_pressure(&self) -> usize {
        self.index
            .relieve_memory_pressure(self.config.max_buckets)
            .await
    }

    pub async fn stats(&self) -> IndexStats {
        self.index.stats().await
    }

    fn validate_window(&self, offset: i64, limit: i64) -> QueryResult<(usize, usize)> {
        let offset = usize::try_from(offset).map_err(|_| {
            QueryError::InvalidArgument(format!("offset must be non-negative, got {}", offset))
        })?;

        let max = self.config.max_page_size;
        let limit = usize::try_from(limit)
            .ok()
            .filter(|l| *l > 0 && *l <= max)
            .ok_or_else(|| {
                QueryError::InvalidArgument(format!("limit must be in 1..={}, got {}", max, limit))
            })?;

        Ok((offset, limit))
    }

    fn prefetch(&self, month: MonthKey, through: usize) {
        let index = self.index.clone();
        tokio::spawn(async move {
            if let Err(e) = index.ensure_loaded(month, through).await {
                tracing::debug!(month = %month, error = %e, "Prefetch failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexConfig;
    use crate::month::MonthZone;
    use crate::source::{IngestAdapter, MediaType, MemoryLibrary, RawAsset};
    use chrono::DateTime;
    use std::sync::Arc;
    use std::time::Duration;

    fn ms(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_millis()
    }

    fn service_over(lib: Arc<MemoryLibrary>, config: ServiceConfig) -> QueryService {
        let adapter = IngestAdapter::new(lib, MonthZone::Utc).with_batch_size(2);
        QueryService::new(MonthIndex::new(adapter, IndexConfig { batch_size: 2 }), config)
    }

    fn library() -> Arc<MemoryLibrary> {
        Arc::new(MemoryLibrary::with_assets([
            RawAsset::taken("A", ms("2024-03-05T09:00:00Z")),
            RawAsset::taken("B", ms("2024-03-05T18:00:00Z")),
            RawAsset::taken("C", ms("2024-03-20T12:00:00Z")).media_type(MediaType::Video),
            RawAsset::taken("D", ms("2024-01-11T12:00:00Z")),
        ]))
    }

    fn no_prefetch() -> ServiceConfig {
        ServiceConfig {
            prefetch_pages: 0,
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_month_photos() {
        let service = service_over(library(), no_prefetch());

        let page = service.fetch_month_photos("2024-03", 0, 2).await.unwrap();
        assert_eq!(page.ids, vec!["C", "B"]);
        assert!(page.has_more);
        assert_eq!(page.month.to_string(), "2024-03");

        let page = service.fetch_month_photos("2024-03", 2, 2).await.unwrap();
        assert_eq!(page.ids, vec!["A"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_fetch_month_count() {
        let service = service_over(library(), no_prefetch());
        let count = service.fetch_month_count("2024-03").await.unwrap();
        assert_eq!(count.total, 3);
        assert_eq!(count.photos, 2);
        assert_eq!(count.videos, 1);

        let empty = service.fetch_month_count("1999-12").await.unwrap();
        assert_eq!(empty.total, 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_source_calls() {
        let lib = library();
        let service = service_over(lib.clone(), no_prefetch());

        assert!(matches!(
            service.fetch_month_photos("bad-key", 0, 10).await,
            Err(QueryError::MalformedKey(_))
        ));
        assert!(matches!(
            service.fetch_month_photos("2024-03", -1, 10).await,
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.fetch_month_photos("2024-03", 0, 0).await,
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.fetch_month_photos("2024-03", 0, 501).await,
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.fetch_month_count("2024-3").await,
            Err(QueryError::MalformedKey(_))
        ));

        assert_eq!(lib.fetch_calls(), 0);
        assert_eq!(lib.count_calls(), 0);
        assert_eq!(service.stats().await.buckets, 0);
    }

    #[tokio::test]
    async fn test_source_unavailable_is_propagated() {
        let lib = library();
        lib.set_available(false);
        let service = service_over(lib, no_prefetch());

        assert!(matches!(
            service.fetch_month_photos("2024-03", 0, 10).await,
            Err(QueryError::SourceUnavailable(_))
        ));
        assert!(matches!(
            service.fetch_month_count("2024-03").await,
            Err(QueryError::SourceUnavailable(_))
        ));
        assert!(matches!(
            service.list_months().await,
            Err(QueryError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_list_months() {
        let service = service_over(library(), no_prefetch());
        let months = service.list_months().await.unwrap();

        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month_key.to_string(), "2024-03");
        assert_eq!(months[0].display_name, "March 2024");
        assert_eq!(months[1].year, 2024);
        assert_eq!(months[1].month, 1);
    }

    #[tokio::test]
    async fn test_prefetch_loads_next_page() {
        let base = ms("2024-05-01T00:00:00Z");
        let lib = Arc::new(MemoryLibrary::with_assets(
            (0..12).map(|i| RawAsset::taken(format!("m{:02}", i), base + i * 60_000)),
        ));
        let service = service_over(lib, ServiceConfig::default());

        service.fetch_month_photos("2024-05", 0, 3).await.unwrap();

        // first page needs 4 entries; the prefetch asks for 7
        let mut materialized = 0;
        for _ in 0..100 {
            materialized = service.stats().await.materialized;
            if materialized >= 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(materialized >= 7);
    }

    #[tokio::test]
    async fn test_relieve_memory_pressure_uses_budget() {
        let config = ServiceConfig {
            max_buckets: 1,
            prefetch_pages: 0,
            ..ServiceConfig::default()
        };
        let service = service_over(library(), config);
        service.fetch_month_count("2024-03").await.unwrap();
        service.fetch_month_count("2024-01").await.unwrap();

        assert_eq!(service.relieve_memory_pressure().await, 1);
        assert_eq!(service.stats().await.buckets, 1);
    }
}
