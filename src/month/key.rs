//! Month keys and the time ranges they cover

use crate::month::error::{MonthKeyError, MonthKeyResult};
use crate::month::zone::MonthZone;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest year representable in the 4-digit canonical form
const MAX_YEAR: i32 = 9999;

/// A calendar month, serialized as `YYYY-MM`
///
/// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// Create a month key, rejecting months outside 1..=12 and years outside 0..=9999
    pub fn new(year: i32, month: u32) -> MonthKeyResult<Self> {
        if !(0..=MAX_YEAR).contains(&year) || !(1..=12).contains(&month) {
            return Err(MonthKeyError::MalformedKey(format!("{:04}-{:02}", year, month)));
        }
        Ok(Self { year, month })
    }

    /// Decode a canonical `YYYY-MM` string
    pub fn decode(s: &str) -> MonthKeyResult<Self> {
        let malformed = || MonthKeyError::MalformedKey(s.to_string());

        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(malformed());
        }
        let digits_ok = bytes[..4]
            .iter()
            .chain(&bytes[5..])
            .all(|b| b.is_ascii_digit());
        if !digits_ok {
            return Err(malformed());
        }

        let year: i32 = s[..4].parse().map_err(|_| malformed())?;
        let month: u32 = s[5..].parse().map_err(|_| malformed())?;
        Self::new(year, month).map_err(|_| malformed())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following month, if it still fits the canonical form
    pub fn next(&self) -> Option<Self> {
        if self.month == 12 {
            Self::new(self.year + 1, 1).ok()
        } else {
            Self::new(self.year, self.month + 1).ok()
        }
    }

    /// The preceding month, if it still fits the canonical form
    pub fn prev(&self) -> Option<Self> {
        if self.month == 1 {
            Self::new(self.year - 1, 12).ok()
        } else {
            Self::new(self.year, self.month - 1).ok()
        }
    }

    /// English display name, e.g. "March 2024"
    pub fn display_name(&self) -> String {
        let name = chrono::Month::try_from(self.month as u8)
            .map(|m| m.name())
            .unwrap_or("Unknown");
        format!("{} {}", name, self.year)
    }

    /// Millisecond range `[start, end)` covered by this month in `zone`
    pub fn range(&self, zone: &MonthZone) -> MonthKeyResult<MonthRange> {
        let start = zone.start_of(self.year, self.month)?;
        let end = if self.month == 12 {
            zone.start_of(self.year + 1, 1)?
        } else {
            zone.start_of(self.year, self.month + 1)?
        };
        Ok(MonthRange::new(start, end))
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = MonthKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

/// Half-open millisecond range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    /// Inclusive start (ms since epoch)
    pub start: i64,
    /// Exclusive end (ms since epoch)
    pub end: i64,
}

impl MonthRange {
    /// Range covering every representable timestamp
    pub const ALL: MonthRange = MonthRange {
        start: i64::MIN,
        end: i64::MAX,
    };

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_canonical() {
        let key = MonthKey::decode("2024-03").unwrap();
        assert_eq!(key.year(), 2024);
        assert_eq!(key.month(), 3);
        assert_eq!(key.to_string(), "2024-03");
    }

    #[test]
    fn test_decode_rejects_non_canonical() {
        for bad in [
            "bad-key", "2024-3", "2024-13", "2024-00", "24-03", "2024/03", "2024-03-01", " 2024-03",
            "+024-03", "2024-+3", "", "２０２４-03",
        ] {
            assert!(
                matches!(MonthKey::decode(bad), Err(MonthKeyError::MalformedKey(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_round_trip_every_month() {
        for year in [0, 1970, 1999, 2024, 9999] {
            for month in 1..=12 {
                let key = MonthKey::new(year, month).unwrap();
                assert_eq!(MonthKey::decode(&key.to_string()).unwrap(), key);
            }
        }
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = MonthKey::decode("2023-12").unwrap();
        let b = MonthKey::decode("2024-01").unwrap();
        let c = MonthKey::decode("2024-11").unwrap();
        assert!(a < b);
        assert!(b < c);

        let mut keys = vec![c, a, b];
        keys.sort();
        assert_eq!(keys, vec![a, b, c]);
    }

    #[test]
    fn test_next_and_prev() {
        let dec = MonthKey::decode("2023-12").unwrap();
        assert_eq!(dec.next().unwrap().to_string(), "2024-01");
        assert_eq!(dec.next().unwrap().prev().unwrap(), dec);
        assert!(MonthKey::new(9999, 12).unwrap().next().is_none());
        assert!(MonthKey::new(0, 1).unwrap().prev().is_none());
    }

    #[test]
    fn test_display_name() {
        let key = MonthKey::decode("2024-03").unwrap();
        assert_eq!(key.display_name(), "March 2024");
    }

    #[test]
    fn test_utc_range() {
        let key = MonthKey::decode("2024-02").unwrap();
        let range = key.range(&MonthZone::Utc).unwrap();
        // 2024-02-01T00:00:00Z .. 2024-03-01T00:00:00Z (leap year)
        assert_eq!(range.start, 1_706_745_600_000);
        assert_eq!(range.end, 1_709_251_200_000);
        assert_eq!(range.duration_ms(), 29 * 24 * 3600 * 1000);
        assert!(range.contains(range.start));
        assert!(!range.contains(range.end));
    }

    #[test]
    fn test_serde_as_string() {
        let key = MonthKey::decode("2024-03").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"2024-03\"");

        let back: MonthKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        assert!(serde_json::from_str::<MonthKey>("\"2024-13\"").is_err());
    }
}
