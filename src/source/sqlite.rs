//! SQLite-backed asset library
//!
//! Mirrors the layout of a device media store: one row per item with a type
//! code, `date_taken` in milliseconds and `date_added` in seconds. The effective
//! timestamp is a generated column with its own B-tree index, so keyset pages
//! and range counts are O(log n + k).
//!
//! The connection lives behind a `std::sync::Mutex` and every query runs on the
//! blocking pool.

use crate::month::MonthRange;
use crate::source::error::{SourceError, SourceResult};
use crate::source::{
    Asset, AssetSource, ChangeEvent, ChangeFeed, MediaCounts, MediaType, OrderKey, RawAsset,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

const SELECT_COLUMNS: &str = "SELECT id, media_type, date_taken, date_added, filename FROM media";

impl MediaType {
    /// Media type for a media-store type code (1 image, 3 video)
    pub fn from_store_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MediaType::Photo),
            3 => Some(MediaType::Video),
            _ => None,
        }
    }

    pub fn store_code(&self) -> i64 {
        match self {
            MediaType::Photo => 1,
            MediaType::Video => 3,
        }
    }
}

/// Asset library stored in a SQLite database file
pub struct SqliteLibrary {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    events: broadcast::Sender<ChangeEvent>,
}

impl SqliteLibrary {
    /// Create or open a library database
    pub fn open(path: &Path) -> SourceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::from_connection(conn, path.to_path_buf())
    }

    /// Library held entirely in memory
    pub fn open_in_memory() -> SourceResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> SourceResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS media (
                id TEXT PRIMARY KEY,
                media_type INTEGER NOT NULL DEFAULT 1,
                date_taken INTEGER,
                date_added INTEGER,
                filename TEXT,
                ts INTEGER GENERATED ALWAYS AS (
                    CASE
                        WHEN date_taken > 0 THEN date_taken
                        WHEN date_added > 0 THEN date_added * 1000
                    END
                ) VIRTUAL
            );
            CREATE INDEX IF NOT EXISTS idx_media_ts ON media(ts DESC, id ASC);
            ",
        )?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::debug!(path = %path.display(), "Opened asset library");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            events,
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or replace an asset and announce it
    pub async fn insert_asset(&self, asset: RawAsset) -> SourceResult<()> {
        self.insert_assets(vec![asset]).await.map(|_| ())
    }

    /// Add or replace several assets in one transaction; returns rows written
    pub async fn insert_assets(&self, assets: Vec<RawAsset>) -> SourceResult<usize> {
        let (written, events) = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut events = Vec::with_capacity(assets.len());
                {
                    let mut previous_ts =
                        tx.prepare_cached("SELECT ts FROM media WHERE id = ?1")?;
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR REPLACE INTO media (id, media_type, date_taken, date_added, filename)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for raw in &assets {
                        let previous: Option<i64> = previous_ts
                            .query_row(params![raw.id], |row| row.get::<_, Option<i64>>(0))
                            .optional()?
                            .flatten();
                        stmt.execute(params![
                            raw.id,
                            raw.media_type.store_code(),
                            raw.date_taken,
                            raw.date_added,
                            raw.filename,
                        ])?;
                        events.extend(ChangeEvent::upserted(previous, raw));
                    }
                }
                tx.commit()?;
                Ok((assets.len(), events))
            })
            .await?;

        for event in events {
            self.emit(event);
        }
        Ok(written)
    }

    /// Delete an asset and announce it; returns whether it existed
    pub async fn delete_asset(&self, id: &str) -> SourceResult<bool> {
        let key = id.to_string();
        let removed: Option<Option<i64>> = self
            .with_conn(move |conn| {
                let ts: Option<Option<i64>> = conn
                    .query_row("SELECT ts FROM media WHERE id = ?1", params![key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                if ts.is_some() {
                    conn.execute("DELETE FROM media WHERE id = ?1", params![key])?;
                }
                Ok(ts)
            })
            .await?;

        match removed {
            Some(ts) => {
                self.emit(ChangeEvent::removed(id, ts));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Change an asset's `date_taken` (ms) and announce the new timestamp
    pub async fn set_date_taken(&self, id: &str, date_taken: i64) -> SourceResult<bool> {
        let key = id.to_string();
        let updated: Option<RawAsset> = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE media SET date_taken = ?1 WHERE id = ?2",
                    params![date_taken, key],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![key],
                    read_raw,
                )
                .optional()
            })
            .await?;

        match updated {
            Some(raw) => {
                if let Some(ts) = raw.effective_timestamp() {
                    let asset = Asset::new(raw.id, ts).media_type(raw.media_type);
                    self.emit(ChangeEvent::timestamp_changed(&asset));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Total number of rows, including ones without a usable timestamp
    pub async fn len(&self) -> SourceResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn with_conn<T, F>(&self, f: F) -> SourceResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| SourceError::Unavailable("library connection poisoned".to_string()))?;
            f(&guard).map_err(SourceError::from)
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("library task failed: {}", e)))?
    }
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawAsset> {
    let code: i64 = row.get(1)?;
    Ok(RawAsset {
        id: row.get(0)?,
        media_type: MediaType::from_store_code(code).unwrap_or_default(),
        date_taken: row.get(2)?,
        date_added: row.get(3)?,
        filename: row.get(4)?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl AssetSource for SqliteLibrary {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_range(
        &self,
        range: MonthRange,
        after: Option<OrderKey>,
        limit: usize,
    ) -> SourceResult<Vec<RawAsset>> {
        let limit = sql_limit(limit);

        self.with_conn(move |conn| {
            let rows: Vec<RawAsset> = match after {
                None => {
                    let mut stmt = conn.prepare_cached(&format!(
                        "{} WHERE ts >= ?1 AND ts < ?2 AND media_type IN (1, 3)
                         ORDER BY ts DESC, id ASC LIMIT ?3",
                        SELECT_COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![range.start, range.end, limit], read_raw)?;
                    rows.collect::<rusqlite::Result<_>>()?
                }
                Some(cursor) => {
                    let mut stmt = conn.prepare_cached(&format!(
                        "{} WHERE ts >= ?1 AND ts < ?2 AND media_type IN (1, 3)
                           AND (ts < ?3 OR (ts = ?3 AND id > ?4))
                         ORDER BY ts DESC, id ASC LIMIT ?5",
                        SELECT_COLUMNS
                    ))?;
                    let rows = stmt.query_map(
                        params![range.start, range.end, cursor.timestamp, cursor.id, limit],
                        read_raw,
                    )?;
                    rows.collect::<rusqlite::Result<_>>()?
                }
            };
            Ok(rows)
        })
        .await
    }

    async fn count_range(&self, range: MonthRange) -> SourceResult<MediaCounts> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT media_type, COUNT(*) FROM media
                 WHERE ts >= ?1 AND ts < ?2 AND media_type IN (1, 3) AND TRIM(id) <> ''
                 GROUP BY media_type",
            )?;
            let rows = stmt.query_map(params![range.start, range.end], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut photos = 0;
            let mut videos = 0;
            for row in rows {
                let (code, count) = row?;
                match MediaType::from_store_code(code) {
                    Some(MediaType::Photo) => photos += count.max(0) as u64,
                    Some(MediaType::Video) => videos += count.max(0) as u64,
                    None => {}
                }
            }
            Ok(MediaCounts::new(photos, videos))
        })
        .await
    }
}

#[async_trait]
impl ChangeFeed for SqliteLibrary {
    async fn subscribe(&self) -> SourceResult<broadcast::Receiver<ChangeEvent>> {
        Ok(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChangeKind;
    use tempfile::tempdir;

    async fn seeded() -> SqliteLibrary {
        let lib = SqliteLibrary::open_in_memory().unwrap();
        lib.insert_assets(vec![
            RawAsset::taken("a", 5_000),
            RawAsset::taken("b", 5_000),
            RawAsset::taken("c", 9_000).media_type(MediaType::Video),
            RawAsset::taken("d", 0).added(7),
            RawAsset::taken("e", 50_000),
            RawAsset {
                id: "undated".to_string(),
                media_type: MediaType::Photo,
                date_taken: None,
                date_added: None,
                filename: None,
            },
        ])
        .await
        .unwrap();
        lib
    }

    #[tokio::test]
    async fn test_fetch_range_keyset_pages() {
        let lib = seeded().await;
        let range = MonthRange::new(0, 10_000);

        let first = lib.fetch_range(range, None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let after = first.last().and_then(RawAsset::order_key);
        let rest = lib.fetch_range(range, after, 10).await.unwrap();
        let ids: Vec<&str> = rest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(rest[0].date_taken, Some(5_000));
    }

    #[tokio::test]
    async fn test_count_range_by_type() {
        let lib = seeded().await;
        let counts = lib.count_range(MonthRange::new(0, 10_000)).await.unwrap();
        assert_eq!(counts, MediaCounts::new(3, 1));

        let all = lib.count_range(MonthRange::ALL).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(lib.len().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_mutations_emit_events() {
        let lib = seeded().await;
        let mut rx = lib.subscribe().await.unwrap();

        assert!(lib.set_date_taken("a", 60_000).await.unwrap());
        assert!(lib.delete_asset("a").await.unwrap());
        assert!(!lib.delete_asset("a").await.unwrap());
        assert!(!lib.set_date_taken("missing", 1).await.unwrap());

        let retimed = rx.recv().await.unwrap();
        assert_eq!(retimed.kind, ChangeKind::TimestampChanged);
        assert_eq!(retimed.timestamp, Some(60_000));

        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.kind, ChangeKind::Removed);
        assert_eq!(removed.timestamp, Some(60_000));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replace_reports_moves() {
        let lib = seeded().await;
        let mut rx = lib.subscribe().await.unwrap();

        lib.insert_asset(RawAsset::taken("a", 90_000)).await.unwrap();
        lib.insert_asset(RawAsset::taken("fresh", 5_000)).await.unwrap();
        lib.insert_asset(RawAsset::taken("fresh", 5_000).filename("same.jpg"))
            .await
            .unwrap();

        let moved = rx.recv().await.unwrap();
        assert_eq!(moved.kind, ChangeKind::TimestampChanged);
        assert_eq!(moved.timestamp, Some(90_000));
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Added);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library.db");

        {
            let lib = SqliteLibrary::open(&path).unwrap();
            lib.insert_asset(RawAsset::taken("x", 1_000).filename("x.jpg"))
                .await
                .unwrap();
        }

        let lib = SqliteLibrary::open(&path).unwrap();
        let rows = lib.fetch_range(MonthRange::ALL, None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filename.as_deref(), Some("x.jpg"));
    }

    #[test]
    fn test_store_codes() {
        assert_eq!(MediaType::from_store_code(1), Some(MediaType::Photo));
        assert_eq!(MediaType::from_store_code(3), Some(MediaType::Video));
        assert_eq!(MediaType::from_store_code(2), None);
        assert_eq!(MediaType::Video.store_code(), 3);
    }
}
