//! Month Index
//!
//! Answers "items N..N+limit of month M" and "how many items are in month M"
//! without rescanning the library on every call:
//!
//! - **MonthBucket**: the materialized, ordered prefix of one month plus its count
//! - **MonthIndex**: buckets by month, coalesced backfills, incremental updates
//!
//! # Architecture
//!
//! ```text
//! page("2024-03", 40, 20)
//!        ↓
//! bucket 2024-03 has 32 entries, needs 61
//!        ↓
//! backfill (one per month, shared by all waiters)
//!   IngestAdapter::fetch_batch(after = cursor) → merge under bucket lock
//!        ↓
//! entries[40..60], has_more = entries.len() > 60
//! ```

mod bucket;
mod error;
mod month_index;

pub use error::{IndexError, IndexResult};
pub use month_index::{IndexConfig, IndexStats, MonthIndex, MonthSlice};
