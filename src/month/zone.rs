//! Calendar zone used to bucket timestamps into months

use crate::month::error::{MonthKeyError, MonthKeyResult};
use crate::month::key::MonthKey;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime,
    TimeZone, Utc,
};
use std::fmt;
use std::str::FromStr;

/// Zone in which month boundaries are computed
///
/// Parsed from `"utc"`, `"local"`, or a fixed offset such as `"+09:00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthZone {
    Utc,
    /// The host's configured zone
    Local,
    Fixed(FixedOffset),
}

impl Default for MonthZone {
    fn default() -> Self {
        MonthZone::Local
    }
}

impl MonthZone {
    /// Month containing `timestamp` (ms since epoch)
    pub fn month_of(&self, timestamp: i64) -> MonthKeyResult<MonthKey> {
        let utc = DateTime::<Utc>::from_timestamp_millis(timestamp)
            .ok_or(MonthKeyError::TimestampOutOfRange(timestamp))?;

        let (year, month) = match self {
            MonthZone::Utc => (utc.year(), utc.month()),
            MonthZone::Local => {
                let local = utc.with_timezone(&Local);
                (local.year(), local.month())
            }
            MonthZone::Fixed(offset) => {
                let fixed = utc.with_timezone(offset);
                (fixed.year(), fixed.month())
            }
        };

        MonthKey::new(year, month).map_err(|_| MonthKeyError::TimestampOutOfRange(timestamp))
    }

    /// First instant (ms since epoch) of the given month in this zone
    pub(crate) fn start_of(&self, year: i32, month: u32) -> MonthKeyResult<i64> {
        let naive = NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| MonthKeyError::MalformedKey(format!("{:04}-{:02}", year, month)))?;

        let start = match self {
            MonthZone::Utc => Some(naive.and_utc().timestamp_millis()),
            MonthZone::Local => first_instant(&Local, &naive),
            MonthZone::Fixed(offset) => first_instant(offset, &naive),
        };

        start.ok_or_else(|| MonthKeyError::MalformedKey(format!("{:04}-{:02}", year, month)))
    }
}

/// Resolve local midnight to an instant, stepping over a DST gap if midnight is skipped
fn first_instant<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> Option<i64> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt.timestamp_millis()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp_millis()),
        LocalResult::None => tz
            .from_local_datetime(&(*naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp_millis()),
    }
}

impl FromStr for MonthZone {
    type Err = MonthKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "utc" | "z" => return Ok(MonthZone::Utc),
            "local" | "system" => return Ok(MonthZone::Local),
            _ => {}
        }

        parse_offset(trimmed)
            .map(MonthZone::Fixed)
            .ok_or_else(|| MonthKeyError::InvalidZone(s.to_string()))
    }
}

/// Parse `+HH:MM`, `-HH:MM` or `+HHMM`
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl fmt::Display for MonthZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthZone::Utc => write!(f, "utc"),
            MonthZone::Local => write!(f, "local"),
            MonthZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_same_month_same_key() {
        let zone = MonthZone::Utc;
        let first = zone.month_of(ms("2024-03-01T00:00:00Z")).unwrap();
        let mid = zone.month_of(ms("2024-03-15T12:30:00Z")).unwrap();
        let last = zone.month_of(ms("2024-03-31T23:59:59.999Z")).unwrap();
        assert_eq!(first, mid);
        assert_eq!(mid, last);
        assert_eq!(first.to_string(), "2024-03");

        let next = zone.month_of(ms("2024-04-01T00:00:00Z")).unwrap();
        assert_eq!(next.to_string(), "2024-04");
    }

    #[test]
    fn test_fixed_offset_shifts_boundary() {
        let tokyo: MonthZone = "+09:00".parse().unwrap();
        // 2024-03-31T20:00Z is already April 1st in Tokyo
        let ts = ms("2024-03-31T20:00:00Z");
        assert_eq!(MonthZone::Utc.month_of(ts).unwrap().to_string(), "2024-03");
        assert_eq!(tokyo.month_of(ts).unwrap().to_string(), "2024-04");

        let range = MonthKey::decode("2024-04").unwrap().range(&tokyo).unwrap();
        assert_eq!(range.start, ms("2024-03-31T15:00:00Z"));
        assert!(range.contains(ts));
    }

    #[test]
    fn test_range_agrees_with_month_of() {
        let zone: MonthZone = "-05:30".parse().unwrap();
        let key = MonthKey::decode("2023-11").unwrap();
        let range = key.range(&zone).unwrap();

        assert_eq!(zone.month_of(range.start).unwrap(), key);
        assert_eq!(zone.month_of(range.end - 1).unwrap(), key);
        assert_eq!(zone.month_of(range.end).unwrap(), key.next().unwrap());
    }

    #[test]
    fn test_parse_zone() {
        assert_eq!("utc".parse::<MonthZone>().unwrap(), MonthZone::Utc);
        assert_eq!("UTC".parse::<MonthZone>().unwrap(), MonthZone::Utc);
        assert_eq!("local".parse::<MonthZone>().unwrap(), MonthZone::Local);
        assert_eq!(
            "+0130".parse::<MonthZone>().unwrap(),
            MonthZone::Fixed(FixedOffset::east_opt(5400).unwrap())
        );
        assert!("mars/olympus".parse::<MonthZone>().is_err());
        assert!("+25:00".parse::<MonthZone>().is_err());
    }

    #[test]
    fn test_out_of_range_timestamp() {
        assert!(matches!(
            MonthZone::Utc.month_of(i64::MAX),
            Err(MonthKeyError::TimestampOutOfRange(_))
        ));
    }
}
