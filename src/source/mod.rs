//! Asset sources and the ingest adapter
//!
//! The device library is an external collaborator reached through two seams:
//!
//! - [`AssetSource`]: keyset-paged, newest-first range scans and cheap range counts
//! - [`ChangeFeed`]: a subscription to add/remove/retime notifications
//!
//! The [`IngestAdapter`] sits on top of a source, normalizes loosely typed
//! [`RawAsset`] records into strict [`Asset`]s, and exposes lazy per-month streams.
//!
//! # Implementations
//!
//! - [`SqliteLibrary`]: a media table laid out like a device media store
//! - [`MemoryLibrary`]: in-memory library for tests and demos
//!
//! # Ordering
//!
//! ```text
//! display order: timestamp DESC, id ASC
//!
//!   (t=20, "c") < (t=5, "a") < (t=5, "b")
//!        ^ newest first      ^ ties broken by id
//! ```

mod adapter;
mod error;
mod memory;
mod sqlite;

pub use adapter::{Batch, IngestAdapter};
pub use error::{SourceError, SourceResult};
pub use memory::MemoryLibrary;
pub use sqlite::SqliteLibrary;

use crate::month::MonthRange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::sync::broadcast;

/// Kind of media an asset holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl Default for MediaType {
    fn default() -> Self {
        MediaType::Photo
    }
}

/// A record as the external library reports it
///
/// Timestamps follow the device media store: `date_taken` in milliseconds,
/// `date_added` in seconds, either may be missing or zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAsset {
    pub id: String,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub date_taken: Option<i64>,
    #[serde(default)]
    pub date_added: Option<i64>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl RawAsset {
    /// Photo taken at `date_taken` (ms)
    pub fn taken(id: impl Into<String>, date_taken: i64) -> Self {
        Self {
            id: id.into(),
            media_type: MediaType::Photo,
            date_taken: Some(date_taken),
            date_added: None,
            filename: None,
        }
    }

    /// Builder method: set media type
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Builder method: set `date_added` (seconds)
    pub fn added(mut self, date_added_secs: i64) -> Self {
        self.date_added = Some(date_added_secs);
        self
    }

    /// Builder method: set filename
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Timestamp used for bucketing and ordering (ms)
    ///
    /// `date_taken` wins when positive, otherwise `date_added` scaled to ms.
    pub fn effective_timestamp(&self) -> Option<i64> {
        match (self.date_taken, self.date_added) {
            (Some(taken), _) if taken > 0 => Some(taken),
            (_, Some(added)) if added > 0 => added.checked_mul(1000),
            _ => None,
        }
    }

    /// Position in display order, if the record has a usable timestamp
    pub fn order_key(&self) -> Option<OrderKey> {
        self.effective_timestamp()
            .map(|timestamp| OrderKey::new(timestamp, self.id.clone()))
    }
}

/// A normalized asset: stable id plus creation timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub media_type: MediaType,
}

impl Asset {
    pub fn new(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            media_type: MediaType::Photo,
        }
    }

    /// Builder method: set media type
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.timestamp, self.id.clone())
    }
}

/// Position of an asset in display order; also used as a scan cursor
///
/// Smaller keys come first: newer timestamps, then ascending ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub timestamp: i64,
    pub id: String,
}

impl OrderKey {
    pub fn new(timestamp: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact counts for a range, split by media type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub total: u64,
    pub photos: u64,
    pub videos: u64,
}

impl MediaCounts {
    pub fn new(photos: u64, videos: u64) -> Self {
        Self {
            total: photos + videos,
            photos,
            videos,
        }
    }

    /// Count one more asset of the given type
    pub fn record(&mut self, media_type: MediaType) {
        self.total += 1;
        match media_type {
            MediaType::Photo => self.photos += 1,
            MediaType::Video => self.videos += 1,
        }
    }
}

/// Kind of change reported by a [`ChangeFeed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    TimestampChanged,
}

/// A change notification
///
/// `timestamp` is the asset's (new) effective timestamp; it is optional for removals.
/// Delivery is at-least-once and may be reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub media_type: MediaType,
}

impl ChangeEvent {
    pub fn added(asset: &Asset) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: asset.id.clone(),
            timestamp: Some(asset.timestamp),
            media_type: asset.media_type,
        }
    }

    pub fn removed(id: impl Into<String>, timestamp: Option<i64>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            timestamp,
            media_type: MediaType::Photo,
        }
    }

    /// Event for writing `raw` over a record whose effective timestamp was `previous`
    ///
    /// A new id is `Added`, a replacement that moves in time is `TimestampChanged`,
    /// and a replacement that loses its timestamp is `Removed`.
    pub fn upserted(previous: Option<i64>, raw: &RawAsset) -> Option<Self> {
        match (previous, raw.effective_timestamp()) {
            (Some(old), None) => Some(Self::removed(raw.id.clone(), Some(old))),
            (None, None) => None,
            (Some(old), Some(ts)) if old != ts => Some(Self::timestamp_changed(
                &Asset::new(raw.id.clone(), ts).media_type(raw.media_type),
            )),
            (_, Some(ts)) => Some(Self::added(
                &Asset::new(raw.id.clone(), ts).media_type(raw.media_type),
            )),
        }
    }

    pub fn timestamp_changed(asset: &Asset) -> Self {
        Self {
            kind: ChangeKind::TimestampChanged,
            id: asset.id.clone(),
            timestamp: Some(asset.timestamp),
            media_type: asset.media_type,
        }
    }
}

/// Enumerable asset store
///
/// `fetch_range` returns records whose effective timestamp lies in `range`, in
/// display order, strictly after `after` when given, at most `limit` of them.
/// Each call is an independent scan.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn fetch_range(
        &self,
        range: MonthRange,
        after: Option<OrderKey>,
        limit: usize,
    ) -> SourceResult<Vec<RawAsset>>;

    /// Exact counts without enumerating ids
    async fn count_range(&self, range: MonthRange) -> SourceResult<MediaCounts>;
}

/// Observable asset store
///
/// A closed receiver means the transport dropped; subscribers are expected to
/// subscribe again.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self) -> SourceResult<broadcast::Receiver<ChangeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timestamp() {
        let raw = RawAsset::taken("a", 1_700_000_000_000);
        assert_eq!(raw.effective_timestamp(), Some(1_700_000_000_000));

        let raw = RawAsset::taken("b", 0).added(1_700_000_000);
        assert_eq!(raw.effective_timestamp(), Some(1_700_000_000_000));

        let raw = RawAsset {
            id: "c".to_string(),
            media_type: MediaType::Photo,
            date_taken: None,
            date_added: Some(-5),
            filename: None,
        };
        assert_eq!(raw.effective_timestamp(), None);
        assert_eq!(raw.order_key(), None);
    }

    #[test]
    fn test_order_key_display_order() {
        let c = OrderKey::new(20, "c");
        let a = OrderKey::new(5, "a");
        let b = OrderKey::new(5, "b");

        let mut keys = vec![b.clone(), a.clone(), c.clone()];
        keys.sort();
        assert_eq!(keys, vec![c, a, b]);
    }

    #[test]
    fn test_media_counts() {
        let mut counts = MediaCounts::default();
        counts.record(MediaType::Photo);
        counts.record(MediaType::Video);
        counts.record(MediaType::Photo);
        assert_eq!(counts, MediaCounts::new(2, 1));
        assert_eq!(counts.total, 3);
    }

    #[test]
    fn test_change_event_serde() {
        let json = r#"{"kind": "timestamp_changed", "id": "42", "timestamp": 1000}"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, ChangeKind::TimestampChanged);
        assert_eq!(event.timestamp, Some(1000));
        assert_eq!(event.media_type, MediaType::Photo);
    }
}
