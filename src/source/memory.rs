//! In-memory asset library
//!
//! Behaves like the SQLite library (same ordering, same change events) and adds
//! knobs for exercising failure paths: an availability switch, an artificial
//! fetch delay, call counters and a way to drop every change subscription.

use crate::month::MonthRange;
use crate::source::error::{SourceError, SourceResult};
use crate::source::{
    Asset, AssetSource, ChangeEvent, ChangeFeed, MediaCounts, OrderKey, RawAsset,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub struct MemoryLibrary {
    assets: RwLock<HashMap<String, RawAsset>>,
    available: AtomicBool,
    fetch_calls: AtomicUsize,
    count_calls: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
    events: Mutex<broadcast::Sender<ChangeEvent>>,
    event_capacity: usize,
}

impl Default for MemoryLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLibrary {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            assets: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fetch_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            fetch_delay: Mutex::new(None),
            events: Mutex::new(tx),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Library pre-populated with `assets`; no events are emitted for them
    pub fn with_assets(assets: impl IntoIterator<Item = RawAsset>) -> Self {
        let library = Self::new();
        {
            let mut map = library.write_assets();
            for asset in assets {
                map.insert(asset.id.clone(), asset);
            }
        }
        library
    }

    /// Builder method: change-feed buffer size (small values make receivers lag)
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        self.events = Mutex::new(tx);
        self.event_capacity = capacity;
        self
    }

    /// Add or replace an asset and announce it
    pub fn insert(&self, asset: RawAsset) {
        let previous = self
            .write_assets()
            .insert(asset.id.clone(), asset.clone())
            .and_then(|old| old.effective_timestamp());
        if let Some(event) = ChangeEvent::upserted(previous, &asset) {
            self.emit(event);
        }
    }

    /// Remove an asset and announce it; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.write_assets().remove(id);
        match removed {
            Some(raw) => {
                self.emit(ChangeEvent::removed(id, raw.effective_timestamp()));
                true
            }
            None => false,
        }
    }

    /// Change an asset's `date_taken` and announce the new timestamp
    pub fn retime(&self, id: &str, date_taken: i64) -> bool {
        let updated = {
            let mut map = self.write_assets();
            match map.get_mut(id) {
                Some(raw) => {
                    raw.date_taken = Some(date_taken);
                    normalized(raw)
                }
                None => return false,
            }
        };
        if let Some(asset) = updated {
            self.emit(ChangeEvent::timestamp_changed(&asset));
        }
        true
    }

    /// Send an arbitrary event to current subscribers
    pub fn emit(&self, event: ChangeEvent) {
        // No receivers is not an error for a feed
        let _ = self.sender().send(event);
    }

    /// Simulate the library becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every `fetch_range` call, to widen race windows in tests
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self
            .fetch_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Close every open subscription, as a dropped transport would
    pub fn drop_subscribers(&self) {
        let (tx, _) = broadcast::channel(self.event_capacity);
        *self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.read_assets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> SourceResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::Unavailable(
                "memory library switched off".to_string(),
            ))
        }
    }

    fn sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn read_assets(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RawAsset>> {
        self.assets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_assets(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RawAsset>> {
        self.assets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delay(&self) -> Option<Duration> {
        *self
            .fetch_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalized(raw: &RawAsset) -> Option<Asset> {
    raw.effective_timestamp()
        .map(|timestamp| Asset::new(raw.id.clone(), timestamp).media_type(raw.media_type))
}

#[async_trait]
impl AssetSource for MemoryLibrary {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_range(
        &self,
        range: MonthRange,
        after: Option<OrderKey>,
        limit: usize,
    ) -> SourceResult<Vec<RawAsset>> {
        self.check_available()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }

        let mut matching: Vec<(OrderKey, RawAsset)> = self
            .read_assets()
            .values()
            .filter_map(|raw| raw.order_key().map(|key| (key, raw.clone())))
            .filter(|(key, _)| range.contains(key.timestamp))
            .filter(|(key, _)| after.as_ref().map_or(true, |after| key > after))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, raw)| raw)
            .collect())
    }

    async fn count_range(&self, range: MonthRange) -> SourceResult<MediaCounts> {
        self.check_available()?;
        self.count_calls.fetch_add(1, Ordering::SeqCst);

        let mut counts = MediaCounts::default();
        for raw in self.read_assets().values() {
            if raw.id.trim().is_empty() {
                continue;
            }
            if let Some(ts) = raw.effective_timestamp() {
                if range.contains(ts) {
                    counts.record(raw.media_type);
                }
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ChangeFeed for MemoryLibrary {
    async fn subscribe(&self) -> SourceResult<broadcast::Receiver<ChangeEvent>> {
        self.check_available()?;
        Ok(self.sender().subscribe())
    }
}
