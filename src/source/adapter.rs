//! Ingest Adapter - normalizes source records into per-month asset streams
//!
//! Every scan is independent: a stream or batch carries its own cursor and
//! nothing is shared between calls, so a scan can be restarted at any time.
//! Records without an id, without a usable timestamp, or outside the requested
//! month are dropped here and never reach the index.

use crate::month::{MonthKey, MonthRange, MonthZone};
use crate::source::error::{SourceError, SourceResult};
use crate::source::{Asset, AssetSource, MediaCounts, OrderKey, RawAsset};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Default number of records requested per source call
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// One page of normalized assets
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Normalized assets in display order
    pub assets: Vec<Asset>,
    /// Position of the last record the source returned (resume point)
    pub cursor: Option<OrderKey>,
    /// Source returned fewer records than requested
    pub exhausted: bool,
    /// Records dropped during normalization
    pub skipped: usize,
}

/// Pulls assets from an [`AssetSource`] month by month
pub struct IngestAdapter {
    source: Arc<dyn AssetSource>,
    zone: MonthZone,
    batch_size: usize,
}

impl IngestAdapter {
    pub fn new(source: Arc<dyn AssetSource>, zone: MonthZone) -> Self {
        Self {
            source,
            zone,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Builder method: records per source call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn zone(&self) -> MonthZone {
        self.zone
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Lazy stream of a month's assets, newest first
    pub fn stream_assets(&self, month: MonthKey) -> BoxStream<'static, SourceResult<Asset>> {
        self.stream_after(month, None)
    }

    /// Lazy stream of a month's assets strictly after `after` in display order
    pub fn stream_after(
        &self,
        month: MonthKey,
        after: Option<OrderKey>,
    ) -> BoxStream<'static, SourceResult<Asset>> {
        match self.month_range(month) {
            Ok(range) => self.scan(Some(month), range, after),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    /// Lazy stream of every dated asset in the library, newest first
    pub fn stream_all(&self) -> BoxStream<'static, SourceResult<Asset>> {
        self.scan(None, MonthRange::ALL, None)
    }

    /// Fetch a single batch of a month's assets after `after`
    pub async fn fetch_batch(
        &self,
        month: MonthKey,
        after: Option<&OrderKey>,
        limit: usize,
    ) -> SourceResult<Batch> {
        let range = self.month_range(month)?;
        fetch_page(self.source.as_ref(), self.zone, Some(month), range, after, limit).await
    }

    /// Exact counts for a month, computed by the source
    pub async fn count_assets(&self, month: MonthKey) -> SourceResult<MediaCounts> {
        let range = self.month_range(month)?;
        self.source.count_range(range).await
    }

    /// Distinct months present in the library, newest first, at most `cap`
    ///
    /// Reads one record per month and then jumps the cursor to the month's start,
    /// so the cost is proportional to the number of months, not assets.
    pub async fn list_months(&self, cap: usize) -> SourceResult<Vec<MonthKey>> {
        let mut months: Vec<MonthKey> = Vec::new();
        let mut after: Option<OrderKey> = None;

        while months.len() < cap {
            let batch = fetch_page(
                self.source.as_ref(),
                self.zone,
                None,
                MonthRange::ALL,
                after.as_ref(),
                1,
            )
            .await?;

            let Some(cursor) = batch.cursor.clone() else {
                break;
            };
            after = Some(cursor);

            if let Some(asset) = batch.assets.first() {
                if let Ok(key) = self.zone.month_of(asset.timestamp) {
                    if months.last() != Some(&key) {
                        months.push(key);

                        if let Ok(range) = key.range(&self.zone) {
                            let jump = OrderKey::new(range.start, String::new());
                            if after.as_ref().map_or(true, |a| jump > *a) {
                                after = Some(jump);
                            }
                        }
                    }
                }
            }

            if batch.exhausted {
                break;
            }
        }

        tracing::debug!(
            source = self.source.name(),
            months = months.len(),
            "Listed library months"
        );
        Ok(months)
    }

    fn month_range(&self, month: MonthKey) -> SourceResult<MonthRange> {
        month
            .range(&self.zone)
            .map_err(|e| SourceError::InvalidRange(e.to_string()))
    }

    fn scan(
        &self,
        month: Option<MonthKey>,
        range: MonthRange,
        after: Option<OrderKey>,
    ) -> BoxStream<'static, SourceResult<Asset>> {
        let source = Arc::clone(&self.source);
        let zone = self.zone;
        let batch_size = self.batch_size;

        // State: None once the source is exhausted, otherwise the resume cursor
        stream::try_unfold(Some(after), move |state| {
            let source = Arc::clone(&source);
            async move {
                let Some(after) = state else {
                    return Ok::<_, SourceError>(None);
                };

                let batch =
                    fetch_page(source.as_ref(), zone, month, range, after.as_ref(), batch_size)
                        .await?;

                let next = match (batch.exhausted, batch.cursor) {
                    (false, Some(cursor)) => Some(Some(cursor)),
                    _ => None,
                };
                let items = stream::iter(batch.assets.into_iter().map(Ok::<Asset, SourceError>));

                Ok(Some((items, next)))
            }
        })
        .try_flatten()
        .boxed()
    }
}

async fn fetch_page(
    source: &dyn AssetSource,
    zone: MonthZone,
    month: Option<MonthKey>,
    range: MonthRange,
    after: Option<&OrderKey>,
    limit: usize,
) -> SourceResult<Batch> {
    let limit = limit.max(1);
    let raw = source.fetch_range(range, after.cloned(), limit).await?;
    let exhausted = raw.len() < limit;

    let cursor = raw.iter().rev().find_map(RawAsset::order_key);
    match (&cursor, after) {
        (None, _) if !raw.is_empty() && !exhausted => {
            return Err(SourceError::Protocol(format!(
                "{} returned a full page without positioned records",
                source.name()
            )));
        }
        (Some(next), Some(prev)) if next <= prev => {
            return Err(SourceError::Protocol(format!(
                "{} did not advance past cursor ({}, {})",
                source.name(),
                prev.timestamp,
                prev.id
            )));
        }
        _ => {}
    }

    let mut skipped = 0;
    let mut seen = HashSet::new();
    let assets: Vec<Asset> = raw
        .into_iter()
        .filter_map(|record| {
            let asset = normalize(record, zone, month).filter(|a| seen.insert(a.id.clone()));
            if asset.is_none() {
                skipped += 1;
            }
            asset
        })
        .collect();

    if skipped > 0 {
        tracing::debug!(
            source = source.name(),
            skipped,
            "Dropped malformed asset records"
        );
    }

    Ok(Batch {
        assets,
        cursor,
        exhausted,
        skipped,
    })
}

fn normalize(raw: RawAsset, zone: MonthZone, month: Option<MonthKey>) -> Option<Asset> {
    if raw.id.trim().is_empty() {
        tracing::debug!("Skipping asset record without id");
        return None;
    }

    let Some(timestamp) = raw.effective_timestamp() else {
        tracing::debug!(id = %raw.id, "Skipping asset record without timestamp");
        return None;
    };

    if let Some(month) = month {
        match zone.month_of(timestamp) {
            Ok(key) if key == month => {}
            _ => {
                tracing::debug!(id = %raw.id, timestamp, month = %month, "Skipping asset outside month");
                return None;
            }
        }
    }

    Some(Asset {
        id: raw.id,
        timestamp,
        media_type: raw.media_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MediaType, MemoryLibrary};
    use chrono::DateTime;

    fn ms(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_millis()
    }

    fn march() -> MonthKey {
        MonthKey::decode("2024-03").unwrap()
    }

    fn library() -> Arc<MemoryLibrary> {
        Arc::new(MemoryLibrary::with_assets([
            RawAsset::taken("A", ms("2024-03-05T10:00:00Z")),
            RawAsset::taken("B", ms("2024-03-05T10:00:00Z")),
            RawAsset::taken("C", ms("2024-03-20T08:00:00Z")).media_type(MediaType::Video),
            RawAsset::taken("D", ms("2024-02-10T08:00:00Z")),
            RawAsset::taken("E", ms("2023-11-01T08:00:00Z")),
        ]))
    }

    #[tokio::test]
    async fn test_stream_month_newest_first() {
        let adapter = IngestAdapter::new(library(), MonthZone::Utc).with_batch_size(2);

        let assets: Vec<Asset> = adapter.stream_assets(march()).try_collect().await.unwrap();
        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_stream_all_spans_months() {
        let adapter = IngestAdapter::new(library(), MonthZone::Utc).with_batch_size(2);

        let assets: Vec<Asset> = adapter.stream_all().try_collect().await.unwrap();
        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B", "D", "E"]);
    }

    #[tokio::test]
    async fn test_stream_is_restartable() {
        let lib = library();
        let adapter = IngestAdapter::new(lib.clone(), MonthZone::Utc).with_batch_size(1);

        let first: Vec<Asset> = adapter.stream_assets(march()).try_collect().await.unwrap();
        let calls_after_first = lib.fetch_calls();
        let second: Vec<Asset> = adapter.stream_assets(march()).try_collect().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lib.fetch_calls(), calls_after_first * 2);
    }

    #[tokio::test]
    async fn test_stream_after_cursor() {
        let adapter = IngestAdapter::new(library(), MonthZone::Utc);
        let after = OrderKey::new(ms("2024-03-05T10:00:00Z"), "A");

        let assets: Vec<Asset> = adapter
            .stream_after(march(), Some(after))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "B");
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let lib = Arc::new(MemoryLibrary::with_assets([
            RawAsset::taken("good", ms("2024-03-02T00:00:00Z")),
            RawAsset::taken("  ", ms("2024-03-03T00:00:00Z")),
            RawAsset::taken("fallback", 0).added(ms("2024-03-01T00:00:00Z") / 1000),
        ]));
        let adapter = IngestAdapter::new(lib, MonthZone::Utc);

        let batch = adapter.fetch_batch(march(), None, 10).await.unwrap();
        let ids: Vec<&str> = batch.assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "fallback"]);
        assert_eq!(batch.skipped, 1);
        assert!(batch.exhausted);
    }

    #[tokio::test]
    async fn test_count_assets() {
        let adapter = IngestAdapter::new(library(), MonthZone::Utc);
        let counts = adapter.count_assets(march()).await.unwrap();
        assert_eq!(counts, MediaCounts::new(2, 1));
    }

    #[tokio::test]
    async fn test_unavailable_source() {
        let lib = library();
        lib.set_available(false);
        let adapter = IngestAdapter::new(lib, MonthZone::Utc);

        let err = adapter.count_assets(march()).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));

        let streamed: Result<Vec<Asset>, _> = adapter.stream_assets(march()).try_collect().await;
        assert!(matches!(streamed, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_list_months() {
        let adapter = IngestAdapter::new(library(), MonthZone::Utc);
        let months = adapter.list_months(240).await.unwrap();
        let keys: Vec<String> = months.iter().map(|m| m.to_string()).collect();
        assert_eq!(keys, vec!["2024-03", "2024-02", "2023-11"]);

        let capped = adapter.list_months(2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }
}
