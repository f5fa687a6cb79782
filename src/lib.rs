//! # Photomonths
//!
//! Month-bucketed index over a photo library: "items N..N+limit of month M"
//! and "how many items are in month M", answered from memory after the first
//! read of each month and kept current from the library's change feed.
//!
//! ## Modules
//!
//! - [`month`]: Month keys, month ranges and the zone they are computed in
//! - [`source`]: Library seams, the ingest adapter, SQLite and in-memory libraries
//! - [`index`]: Per-month ordered buckets with coalesced backfills
//! - [`service`]: Validated month queries
//! - [`listener`]: Applies library change events to the index
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photomonths::index::{IndexConfig, MonthIndex};
//! use photomonths::month::MonthZone;
//! use photomonths::service::{QueryService, ServiceConfig};
//! use photomonths::source::{IngestAdapter, SqliteLibrary};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let library = Arc::new(SqliteLibrary::open("library.db".as_ref())?);
//!     let adapter = IngestAdapter::new(library, MonthZone::Local);
//!     let service = QueryService::new(
//!         MonthIndex::new(adapter, IndexConfig::default()),
//!         ServiceConfig::default(),
//!     );
//!
//!     let page = service.fetch_month_photos("2024-03", 0, 60).await?;
//!     let count = service.fetch_month_count("2024-03").await?;
//!     println!("{} of {} ids, more: {}", page.ids.len(), count.total, page.has_more);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod index;
pub mod listener;
pub mod month;
pub mod service;
pub mod source;

// Re-export top-level types for convenience
pub use month::{MonthKey, MonthKeyError, MonthRange, MonthZone};

pub use source::{
    Asset, AssetSource, ChangeEvent, ChangeFeed, ChangeKind, IngestAdapter, MediaCounts,
    MediaType, MemoryLibrary, RawAsset, SourceError, SqliteLibrary,
};

pub use index::{IndexConfig, IndexError, IndexStats, MonthIndex, MonthSlice};

pub use service::{MonthCount, MonthPage, MonthSummary, QueryError, QueryService, ServiceConfig};

pub use listener::{InvalidationListener, ListenerConfig, ListenerState, ListenerStats};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};
