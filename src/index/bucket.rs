//! Month Bucket - the materialized, ordered prefix of one month
//!
//! A bucket holds the first N assets of its month in display order, plus the
//! source cursor where the next scan resumes. Everything at or before the
//! cursor is materialized; everything after it is still only in the source.
//!
//! ```text
//! entries:  [C] [A] [B] ... [X] | ........ not yet scanned ........
//!                              ^ cursor (resume point)
//! ```
//!
//! Buckets are plain data guarded by a per-month async mutex in the index.
//! Scans run without the lock: `begin_scan` hands out the cursor and a token,
//! the batch is fetched, and `finish_scan` merges it under the lock. Changes
//! that arrive while a batch is in flight are recorded so the merge can
//! reconcile them.

use crate::month::MonthKey;
use crate::source::{Asset, Batch, MediaCounts, MediaType, OrderKey};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// One materialized asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BucketEntry {
    pub key: OrderKey,
    pub media_type: MediaType,
}

impl BucketEntry {
    pub fn from_asset(asset: &Asset) -> Self {
        Self {
            key: asset.order_key(),
            media_type: asset.media_type,
        }
    }
}

/// What happened to an asset handed to [`MonthBucket::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// Inside the materialized prefix; now visible to pages
    Placed,
    /// Past the prefix while a scan is in flight; settled when it merges
    Deferred,
    /// Past the prefix; a later scan will pick it up from the source
    Beyond,
    /// Already present at the same position
    Duplicate,
}

/// Bookkeeping for the batch currently being fetched
#[derive(Debug, Default)]
struct ScanState {
    token: u64,
    removed: HashSet<String>,
    pending: Vec<BucketEntry>,
}

#[derive(Debug)]
pub(crate) struct MonthBucket {
    month: MonthKey,
    entries: Vec<BucketEntry>,
    members: HashMap<String, OrderKey>,
    counts: Option<MediaCounts>,
    count_epoch: u64,
    fully_loaded: bool,
    cursor: Option<OrderKey>,
    scan: Option<ScanState>,
    next_token: u64,
    wanted: usize,
    last_access: Instant,
}

impl MonthBucket {
    pub fn new(month: MonthKey) -> Self {
        Self {
            month,
            entries: Vec::new(),
            members: HashMap::new(),
            counts: None,
            count_epoch: 0,
            fully_loaded: false,
            cursor: None,
            scan: None,
            next_token: 0,
            wanted: 0,
            last_access: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    // ==================== Loading ====================

    /// `entries[0..through)` is materialized, or there is nothing more to load
    pub fn is_satisfied(&self, through: usize) -> bool {
        self.fully_loaded || self.entries.len() >= through
    }

    /// Raise the prefix length the running backfill must reach
    pub fn request(&mut self, through: usize) {
        self.wanted = self.wanted.max(through);
    }

    pub fn needs_backfill(&self) -> bool {
        !self.is_satisfied(self.wanted)
    }

    /// Start a batch: returns the resume cursor and a token for `finish_scan`
    pub fn begin_scan(&mut self) -> (Option<OrderKey>, u64) {
        self.next_token += 1;
        self.scan = Some(ScanState {
            token: self.next_token,
            ..ScanState::default()
        });
        (self.cursor.clone(), self.next_token)
    }

    /// Merge a fetched batch; returns the ids that became visible
    ///
    /// Returns `None` when the scan was superseded (the bucket was reset), in
    /// which case the batch is discarded.
    pub fn finish_scan(&mut self, token: u64, batch: Batch) -> Option<Vec<String>> {
        if self.scan.as_ref().map(|s| s.token) != Some(token) {
            return None;
        }
        let scan = self.scan.take()?;
        let mut placed = Vec::new();

        for asset in &batch.assets {
            // removed mid-flight, or already placed by an insert
            if scan.removed.contains(&asset.id) || self.members.contains_key(&asset.id) {
                continue;
            }
            self.place(BucketEntry::from_asset(asset));
            placed.push(asset.id.clone());
        }

        if batch.exhausted {
            self.fully_loaded = true;
            self.cursor = None;
            self.counts = None;
        } else if let Some(cursor) = batch.cursor {
            self.cursor = Some(cursor);
        }

        for entry in scan.pending {
            if self.members.contains_key(&entry.key.id) || !self.covers(&entry.key) {
                continue;
            }
            placed.push(entry.key.id.clone());
            self.place(entry);
        }

        Some(placed)
    }

    /// Drop the in-flight batch after a failed fetch; the prefix stays as it was
    pub fn abort_scan(&mut self, token: u64) {
        if self.scan.as_ref().map(|s| s.token) == Some(token) {
            self.scan = None;
        }
    }

    /// Forget everything; the next query reloads from the source
    pub fn reset(&mut self) {
        tracing::trace!(month = %self.month, entries = self.entries.len(), "Bucket reset");
        self.entries.clear();
        self.members.clear();
        self.invalidate_count();
        self.fully_loaded = false;
        self.cursor = None;
        self.scan = None;
        self.wanted = 0;
    }

    // ==================== Mutation ====================

    pub fn insert(&mut self, entry: BucketEntry) -> InsertOutcome {
        if let Some(existing) = self.members.get(&entry.key.id) {
            if *existing == entry.key {
                return InsertOutcome::Duplicate;
            }
            let old = existing.clone();
            self.unplace(&old);
        }

        self.invalidate_count();

        if self.covers(&entry.key) {
            self.place(entry);
            InsertOutcome::Placed
        } else if let Some(scan) = self.scan.as_mut() {
            scan.pending.retain(|p| p.key.id != entry.key.id);
            scan.pending.push(entry);
            InsertOutcome::Deferred
        } else {
            InsertOutcome::Beyond
        }
    }

    /// Remove an id; returns whether it was materialized
    ///
    /// The cached count is dropped even when the id is not materialized, since
    /// it may sit past the prefix.
    pub fn remove(&mut self, id: &str) -> bool {
        self.invalidate_count();

        if let Some(scan) = self.scan.as_mut() {
            scan.removed.insert(id.to_string());
            scan.pending.retain(|p| p.key.id != id);
        }

        match self.members.get(id).cloned() {
            Some(key) => {
                self.unplace(&key);
                true
            }
            None => false,
        }
    }

    // ==================== Queries ====================

    /// Up to `limit` ids starting at `offset`, and whether anything follows
    pub fn page(&self, offset: usize, limit: usize) -> (Vec<String>, bool) {
        let len = self.entries.len();
        let start = offset.min(len);
        let end = offset.saturating_add(limit).min(len);

        let ids = self.entries[start..end]
            .iter()
            .map(|e| e.key.id.clone())
            .collect();

        (ids, len > end || !self.fully_loaded)
    }

    /// Exact counts if known: derived when fully loaded, else the cached value
    pub fn counts(&self) -> Option<MediaCounts> {
        if self.fully_loaded {
            let mut counts = MediaCounts::default();
            for entry in &self.entries {
                counts.record(entry.media_type);
            }
            return Some(counts);
        }
        self.counts
    }

    /// Changes whenever a mutation could have made a count stale
    pub fn count_epoch(&self) -> u64 {
        self.count_epoch
    }

    /// Cache counts fetched at `epoch`; ignored if the bucket changed since
    pub fn store_counts(&mut self, counts: MediaCounts, epoch: u64) -> bool {
        if epoch != self.count_epoch || self.fully_loaded {
            return false;
        }
        self.counts = Some(counts);
        true
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.id.clone()).collect()
    }

    fn covers(&self, key: &OrderKey) -> bool {
        self.fully_loaded || self.cursor.as_ref().map_or(false, |cursor| key <= cursor)
    }

    fn place(&mut self, entry: BucketEntry) {
        let pos = self
            .entries
            .binary_search_by(|e| e.key.cmp(&entry.key))
            .unwrap_or_else(|pos| pos);
        self.members.insert(entry.key.id.clone(), entry.key.clone());
        self.entries.insert(pos, entry);
    }

    fn unplace(&mut self, key: &OrderKey) {
        if let Ok(pos) = self.entries.binary_search_by(|e| e.key.cmp(key)) {
            self.entries.remove(pos);
        }
        self.members.remove(&key.id);
    }

    fn invalidate_count(&mut self) {
        self.counts = None;
        self.count_epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month() -> MonthKey {
        MonthKey::decode("2024-03").unwrap()
    }

    fn batch(assets: Vec<Asset>, exhausted: bool) -> Batch {
        let cursor = assets.last().map(Asset::order_key);
        Batch {
            assets,
            cursor,
            exhausted,
            skipped: 0,
        }
    }

    fn entry(id: &str, ts: i64) -> BucketEntry {
        BucketEntry::from_asset(&Asset::new(id, ts))
    }

    #[test]
    fn test_scan_merges_in_order() {
        let mut bucket = MonthBucket::new(month());
        let (after, token) = bucket.begin_scan();
        assert!(after.is_none());

        let placed = bucket
            .finish_scan(token, batch(vec![Asset::new("c", 30), Asset::new("a", 20)], false))
            .unwrap();
        assert_eq!(placed, vec!["c", "a"]);
        assert!(!bucket.is_fully_loaded());
        assert!(bucket.is_satisfied(2));
        assert!(!bucket.is_satisfied(3));

        let (after, token) = bucket.begin_scan();
        assert_eq!(after, Some(OrderKey::new(20, "a")));
        bucket.finish_scan(token, batch(vec![Asset::new("b", 20)], true));

        assert_eq!(bucket.ids(), vec!["c", "a", "b"]);
        assert!(bucket.is_fully_loaded());
        assert_eq!(bucket.counts(), Some(MediaCounts::new(3, 0)));
    }

    #[test]
    fn test_removed_during_scan_is_not_resurrected() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();

        assert!(!bucket.remove("gone"));
        bucket.finish_scan(token, batch(vec![Asset::new("gone", 50), Asset::new("kept", 40)], true));

        assert_eq!(bucket.ids(), vec!["kept"]);
    }

    #[test]
    fn test_insert_relative_to_prefix() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.finish_scan(token, batch(vec![Asset::new("x", 100), Asset::new("y", 80)], false));

        // newer than the cursor: visible immediately
        assert_eq!(bucket.insert(entry("new", 200)), InsertOutcome::Placed);
        assert_eq!(bucket.insert(entry("new", 200)), InsertOutcome::Duplicate);
        // older than the cursor with no scan running: left to the source
        assert_eq!(bucket.insert(entry("old", 10)), InsertOutcome::Beyond);
        assert_eq!(bucket.ids(), vec!["new", "x", "y"]);
    }

    #[test]
    fn test_pending_insert_settles_at_merge() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.finish_scan(token, batch(vec![Asset::new("x", 100)], false));

        let (_, token) = bucket.begin_scan();
        assert_eq!(bucket.insert(entry("mid", 70)), InsertOutcome::Deferred);
        assert_eq!(bucket.insert(entry("late", 5)), InsertOutcome::Deferred);

        let placed = bucket
            .finish_scan(token, batch(vec![Asset::new("y", 90), Asset::new("z", 60)], false))
            .unwrap();

        // "mid" falls inside the new prefix; "late" is still past the cursor
        assert_eq!(placed, vec!["y", "z", "mid"]);
        assert_eq!(bucket.ids(), vec!["x", "y", "mid", "z"]);
    }

    #[test]
    fn test_retime_within_month_moves_entry() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.finish_scan(
            token,
            batch(vec![Asset::new("a", 30), Asset::new("b", 20)], true),
        );

        assert_eq!(bucket.insert(entry("b", 40)), InsertOutcome::Placed);
        assert_eq!(bucket.ids(), vec!["b", "a"]);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn test_stale_scan_is_discarded_after_reset() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.reset();

        assert!(bucket
            .finish_scan(token, batch(vec![Asset::new("a", 1)], true))
            .is_none());
        assert_eq!(bucket.len(), 0);
        assert!(!bucket.is_fully_loaded());
    }

    #[test]
    fn test_abort_keeps_prefix() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.finish_scan(token, batch(vec![Asset::new("a", 10)], false));

        let (_, token) = bucket.begin_scan();
        bucket.abort_scan(token);
        assert!(!bucket.is_scanning());
        assert_eq!(bucket.ids(), vec!["a"]);
    }

    #[test]
    fn test_count_epoch_rejects_stale_counts() {
        let mut bucket = MonthBucket::new(month());
        let epoch = bucket.count_epoch();
        bucket.remove("somewhere");

        assert!(!bucket.store_counts(MediaCounts::new(5, 0), epoch));
        assert_eq!(bucket.counts(), None);

        let epoch = bucket.count_epoch();
        assert!(bucket.store_counts(MediaCounts::new(4, 1), epoch));
        assert_eq!(bucket.counts(), Some(MediaCounts::new(4, 1)));

        bucket.insert(entry("n", 1));
        assert_eq!(bucket.counts(), None);
    }

    #[test]
    fn test_page_bounds() {
        let mut bucket = MonthBucket::new(month());
        let (_, token) = bucket.begin_scan();
        bucket.finish_scan(
            token,
            batch(
                vec![Asset::new("c", 30), Asset::new("b", 20), Asset::new("a", 10)],
                true,
            ),
        );

        assert_eq!(bucket.page(0, 2), (vec!["c".to_string(), "b".to_string()], true));
        assert_eq!(bucket.page(2, 2), (vec!["a".to_string()], false));
        assert_eq!(bucket.page(3, 2), (Vec::new(), false));
        assert_eq!(bucket.page(usize::MAX, usize::MAX), (Vec::new(), false));
    }
}
