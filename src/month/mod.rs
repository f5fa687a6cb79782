//! Month Key Codec
//!
//! Canonical month keys used to bucket assets:
//!
//! - **key**: `MonthKey` (`YYYY-MM`) and the `[start, end)` millisecond range it covers
//! - **zone**: `MonthZone`, the calendar zone a timestamp is bucketed in
//! - **error**: codec errors
//!
//! # Example
//!
//! ```rust
//! use photomonths::month::{MonthKey, MonthZone};
//!
//! let zone = MonthZone::Utc;
//! let key = zone.month_of(1_709_251_200_000).unwrap(); // 2024-03-01T00:00:00Z
//! assert_eq!(key.to_string(), "2024-03");
//! assert_eq!("2024-03".parse::<MonthKey>().unwrap(), key);
//! ```

mod error;
mod key;
mod zone;

pub use error::{MonthKeyError, MonthKeyResult};
pub use key::{MonthKey, MonthRange};
pub use zone::MonthZone;
