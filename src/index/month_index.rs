//! Month Index - lazily materialized, per-month ordered asset ids
//!
//! Buckets are created when a month is first queried and filled on demand by
//! backfills that pull batches through the [`IngestAdapter`].
//!
//! # Concurrency
//!
//! - Each bucket has its own async mutex; months never contend with each other.
//! - At most one backfill runs per month. Overlapping `ensure_loaded` calls
//!   join the same spawned task through a shared future, so a caller that
//!   gives up only stops waiting; the backfill carries on for the others.
//! - A backfill holds the bucket lock only to hand out the cursor and to merge
//!   a fetched batch, never across the source call.
//! - An `id -> month` table tracks where every materialized asset lives, which
//!   keeps removals O(1) and lets an asset that changed month be moved.

use crate::index::bucket::{BucketEntry, InsertOutcome, MonthBucket};
use crate::index::error::{IndexError, IndexResult};
use crate::month::{MonthKey, MonthZone};
use crate::source::{Asset, IngestAdapter, MediaCounts};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Page attempts before answering from whatever is materialized
const MAX_PAGE_ATTEMPTS: usize = 3;

type SharedBackfill = Shared<BoxFuture<'static, IndexResult<()>>>;
type BucketHandle = Arc<Mutex<MonthBucket>>;

/// Configuration for the month index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Records requested from the source per backfill batch
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { batch_size: 200 }
    }
}

/// A slice of one month in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthSlice {
    pub ids: Vec<String>,
    pub has_more: bool,
}

/// Statistics about index usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Months with a bucket
    pub buckets: usize,
    /// Buckets holding their whole month
    pub fully_loaded: usize,
    /// Asset ids materialized across all buckets
    pub materialized: usize,
    /// Partially loaded buckets with a cached count
    pub cached_counts: usize,
    /// Entries in the id -> month table
    pub tracked_ids: usize,
    pub backfills_in_flight: usize,
    pub backfills_started: u64,
}

struct InflightBackfill {
    id: u64,
    future: SharedBackfill,
}

struct IndexInner {
    adapter: IngestAdapter,
    config: IndexConfig,
    buckets: RwLock<HashMap<MonthKey, BucketHandle>>,
    locations: StdRwLock<HashMap<String, MonthKey>>,
    inflight: StdMutex<HashMap<MonthKey, InflightBackfill>>,
    next_backfill: AtomicU64,
    backfills_started: AtomicU64,
}

/// Month-bucketed asset index
///
/// Cheap to clone; clones share the same buckets.
#[derive(Clone)]
pub struct MonthIndex {
    inner: Arc<IndexInner>,
}

impl MonthIndex {
    pub fn new(adapter: IngestAdapter, config: IndexConfig) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                adapter,
                config,
                buckets: RwLock::new(HashMap::new()),
                locations: StdRwLock::new(HashMap::new()),
                inflight: StdMutex::new(HashMap::new()),
                next_backfill: AtomicU64::new(0),
                backfills_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn zone(&self) -> MonthZone {
        self.inner.adapter.zone()
    }

    pub fn adapter(&self) -> &IngestAdapter {
        &self.inner.adapter
    }

    // ==================== Query Methods ====================

    /// Materialize `[0, through)` of a month, or the whole month if shorter
    ///
    /// Idempotent; returns immediately when already satisfied.
    pub async fn ensure_loaded(&self, month: MonthKey, through: usize) -> IndexResult<()> {
        let bucket = self.bucket(month).await;
        self.load_bucket(month, &bucket, through).await
    }

    /// Up to `limit` ids starting at `offset`
    ///
    /// An offset past the end is not an error: the slice is empty and
    /// `has_more` is false.
    pub async fn page(&self, month: MonthKey, offset: usize, limit: usize) -> IndexResult<MonthSlice> {
        if limit == 0 {
            return Err(IndexError::InvalidArgument(
                "limit must be positive".to_string(),
            ));
        }

        let bucket = self.bucket(month).await;
        {
            let mut guard = bucket.lock().await;
            guard.touch();
            if let Some(counts) = guard.counts() {
                if offset as u64 >= counts.total {
                    return Ok(MonthSlice {
                        ids: Vec::new(),
                        has_more: false,
                    });
                }
            }
        }

        // One extra entry makes `has_more` exact
        let through = offset.saturating_add(limit).saturating_add(1);
        let mut attempts = 0;
        loop {
            self.load_bucket(month, &bucket, through).await?;
            attempts += 1;

            let guard = bucket.lock().await;
            if guard.is_satisfied(through) || attempts >= MAX_PAGE_ATTEMPTS {
                let (ids, has_more) = guard.page(offset, limit);
                return Ok(MonthSlice { ids, has_more });
            }
            // Removals shrank the prefix between loading and reading
        }
    }

    /// Exact counts for a month
    ///
    /// Served from the bucket when known, otherwise from the source's count
    /// path and cached until the next change to that month.
    pub async fn count(&self, month: MonthKey) -> IndexResult<MediaCounts> {
        let bucket = self.bucket(month).await;

        let epoch = {
            let mut guard = bucket.lock().await;
            guard.touch();
            if let Some(counts) = guard.counts() {
                return Ok(counts);
            }
            guard.count_epoch()
        };

        let counts = self.inner.adapter.count_assets(month).await?;

        if !bucket.lock().await.store_counts(counts, epoch) {
            tracing::debug!(month = %month, "Month changed during count; not caching");
        }
        Ok(counts)
    }

    /// Month a materialized asset currently lives in
    pub fn locate(&self, id: &str) -> Option<MonthKey> {
        self.inner
            .locations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .copied()
    }

    /// Months that currently have a bucket
    pub async fn loaded_months(&self) -> Vec<MonthKey> {
        let mut months: Vec<MonthKey> = self.inner.buckets.read().await.keys().copied().collect();
        months.sort();
        months
    }

    pub async fn stats(&self) -> IndexStats {
        let buckets: Vec<BucketHandle> = self.inner.buckets.read().await.values().cloned().collect();

        let mut stats = IndexStats {
            buckets: buckets.len(),
            tracked_ids: self
                .inner
                .locations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            backfills_in_flight: self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            backfills_started: self.inner.backfills_started.load(Ordering::SeqCst),
            ..IndexStats::default()
        };

        for bucket in buckets {
            let guard = bucket.lock().await;
            stats.materialized += guard.len();
            if guard.is_fully_loaded() {
                stats.fully_loaded += 1;
            } else if guard.counts().is_some() {
                stats.cached_counts += 1;
            }
        }
        stats
    }

    // ==================== Update Methods ====================

    /// Add (or move) an asset; returns whether it is now visible to pages
    ///
    /// Months without a bucket are left alone; they load from the source on
    /// first query.
    pub async fn apply_insert(&self, asset: &Asset) -> IndexResult<bool> {
        if asset.id.trim().is_empty() {
            return Err(IndexError::InvalidArgument("asset id is empty".to_string()));
        }
        let month = self.zone().month_of(asset.timestamp)?;

        match self.locate(&asset.id) {
            Some(previous) if previous != month => {
                self.remove_from(previous, &asset.id).await;
                self.forget_location(&asset.id, previous);
                tracing::debug!(id = %asset.id, from = %previous, to = %month, "Asset changed month");
            }
            Some(_) => {}
            None => self.detach_unlocated(&asset.id, month).await,
        }

        let Some(bucket) = self.existing_bucket(month).await else {
            return Ok(false);
        };

        let outcome = bucket.lock().await.insert(BucketEntry::from_asset(asset));
        match outcome {
            InsertOutcome::Placed | InsertOutcome::Duplicate => {
                self.record_location(&asset.id, month);
                Ok(true)
            }
            InsertOutcome::Deferred | InsertOutcome::Beyond => {
                self.forget_location(&asset.id, month);
                Ok(false)
            }
        }
    }

    /// Remove an asset; returns whether a materialized entry was dropped
    ///
    /// Uses the id table and `known_month`; when neither places the asset,
    /// every loaded bucket is visited.
    pub async fn apply_remove(&self, id: &str, known_month: Option<MonthKey>) -> bool {
        let located = self
            .inner
            .locations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);

        let mut targets: Vec<MonthKey> = located.into_iter().chain(known_month).collect();
        targets.dedup();
        if targets.is_empty() {
            targets = self.loaded_months().await;
            tracing::debug!(id, buckets = targets.len(), "Removing unlocated asset from all loaded months");
        }

        let mut removed = false;
        for month in targets {
            removed |= self.remove_from(month, id).await;
        }
        removed
    }

    /// Drop every materialized entry and cached count
    ///
    /// Used when change notifications were lost; buckets reload on next query.
    pub async fn reset_loaded(&self) {
        let buckets: Vec<BucketHandle> = self.inner.buckets.read().await.values().cloned().collect();
        for bucket in &buckets {
            bucket.lock().await.reset();
        }
        self.inner
            .locations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();

        tracing::info!(buckets = buckets.len(), "Reset all loaded months");
    }

    /// Evict least recently used buckets until at most `max_buckets` remain
    ///
    /// Buckets with a backfill in flight are kept. This is the only way a
    /// bucket ever leaves the index.
    pub async fn relieve_memory_pressure(&self, max_buckets: usize) -> usize {
        let busy: Vec<MonthKey> = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();

        let evicted: Vec<MonthKey> = {
            let mut buckets = self.inner.buckets.write().await;
            if buckets.len() <= max_buckets {
                return 0;
            }
            let excess = buckets.len() - max_buckets;

            let mut candidates: Vec<(Instant, MonthKey)> = buckets
                .iter()
                .filter(|(month, _)| !busy.contains(month))
                .filter_map(|(month, bucket)| {
                    let guard = bucket.try_lock().ok()?;
                    (!guard.is_scanning()).then(|| (guard.last_access(), *month))
                })
                .collect();
            candidates.sort();

            let evicted: Vec<MonthKey> = candidates
                .into_iter()
                .take(excess)
                .map(|(_, month)| month)
                .collect();
            for month in &evicted {
                buckets.remove(month);
            }
            evicted
        };

        self.inner
            .locations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|_, month| !evicted.contains(month));

        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), max_buckets, "Evicted month buckets");
        }
        evicted.len()
    }

    // ==================== Internals ====================

    async fn bucket(&self, month: MonthKey) -> BucketHandle {
        if let Some(bucket) = self.existing_bucket(month).await {
            return bucket;
        }
        let mut buckets = self.inner.buckets.write().await;
        Arc::clone(
            buckets
                .entry(month)
                .or_insert_with(|| Arc::new(Mutex::new(MonthBucket::new(month)))),
        )
    }

    async fn existing_bucket(&self, month: MonthKey) -> Option<BucketHandle> {
        self.inner.buckets.read().await.get(&month).cloned()
    }

    async fn load_bucket(&self, month: MonthKey, bucket: &BucketHandle, through: usize) -> IndexResult<()> {
        loop {
            {
                let mut guard = bucket.lock().await;
                guard.touch();
                if guard.is_satisfied(through) {
                    return Ok(());
                }
                guard.request(through);
            }
            self.join_backfill(month, bucket).await?;
        }
    }

    /// Wait for the month's backfill, starting one if none is running
    async fn join_backfill(&self, month: MonthKey, bucket: &BucketHandle) -> IndexResult<()> {
        let future = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            match inflight.get(&month) {
                Some(running) => running.future.clone(),
                None => {
                    let id = self.inner.next_backfill.fetch_add(1, Ordering::SeqCst);
                    let task_index = self.clone();
                    let task_bucket = Arc::clone(bucket);
                    let handle = tokio::spawn(async move {
                        let result = task_index.run_backfill(month, task_bucket).await;
                        task_index.finish_backfill(month, id);
                        result
                    });

                    let cleanup_index = self.clone();
                    let future = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                cleanup_index.finish_backfill(month, id);
                                Err(IndexError::BackfillAborted {
                                    month,
                                    reason: e.to_string(),
                                })
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    inflight.insert(
                        month,
                        InflightBackfill {
                            id,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }

    fn finish_backfill(&self, month: MonthKey, id: u64) {
        let mut inflight = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inflight.get(&month).map(|b| b.id) == Some(id) {
            inflight.remove(&month);
        }
    }

    async fn run_backfill(&self, month: MonthKey, bucket: BucketHandle) -> IndexResult<()> {
        self.inner.backfills_started.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let mut batches = 0usize;
        let mut placed_total = 0usize;

        tracing::debug!(month = %month, source = self.inner.adapter.source_name(), "Backfill started");

        loop {
            let (after, token) = {
                let mut guard = bucket.lock().await;
                if !guard.needs_backfill() {
                    break;
                }
                guard.begin_scan()
            };

            let fetched = self
                .inner
                .adapter
                .fetch_batch(month, after.as_ref(), self.inner.config.batch_size)
                .await;

            let batch = match fetched {
                Ok(batch) => batch,
                Err(e) => {
                    bucket.lock().await.abort_scan(token);
                    tracing::warn!(month = %month, batches, error = %e, "Backfill aborted");
                    return Err(e.into());
                }
            };

            batches += 1;
            let placed = bucket.lock().await.finish_scan(token, batch);
            if let Some(placed) = placed {
                placed_total += placed.len();
                self.record_placed(month, &placed).await;
            }
        }

        tracing::debug!(
            month = %month,
            batches,
            placed = placed_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backfill finished"
        );
        Ok(())
    }

    /// Track ids merged into `month`, evicting copies left in other months
    async fn record_placed(&self, month: MonthKey, placed: &[String]) {
        let moved: Vec<(String, MonthKey)> = {
            let mut locations = self
                .inner
                .locations
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            placed
                .iter()
                .filter_map(|id| {
                    locations
                        .insert(id.clone(), month)
                        .filter(|previous| *previous != month)
                        .map(|previous| (id.clone(), previous))
                })
                .collect()
        };

        for (id, previous) in moved {
            tracing::debug!(id = %id, from = %previous, to = %month, "Backfill relocated asset");
            self.remove_from(previous, &id).await;
        }
    }

    /// An id missing from the location table may still sit past the loaded
    /// prefix of another month; drop it there and invalidate that month's count
    async fn detach_unlocated(&self, id: &str, except: MonthKey) {
        let partial: Vec<BucketHandle> = self
            .inner
            .buckets
            .read()
            .await
            .iter()
            .filter(|(month, _)| **month != except)
            .map(|(_, bucket)| Arc::clone(bucket))
            .collect();

        for bucket in partial {
            let mut guard = bucket.lock().await;
            if !guard.is_fully_loaded() {
                guard.remove(id);
            }
        }
    }

    async fn remove_from(&self, month: MonthKey, id: &str) -> bool {
        match self.existing_bucket(month).await {
            Some(bucket) => bucket.lock().await.remove(id),
            None => false,
        }
    }

    fn record_location(&self, id: &str, month: MonthKey) {
        self.inner
            .locations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.to_string(), month);
    }

    fn forget_location(&self, id: &str, month: MonthKey) {
        let mut locations = self
            .inner
            .locations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locations.get(id) == Some(&month) {
            locations.remove(id);
        }
    }
}
