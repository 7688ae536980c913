//! Small helpers shared by the rbroker crates.
//!
//! - [`Counter`]: atomic current/max counter used for management statistics
//! - [`AtomicTimestamp`]: last-event timestamp that can be read without locking
//! - millisecond timestamps and their human-readable formatting
//! - duration parsing for configuration values such as `"1m30s"` or `"500ms"`
//!
//! ```
//! use rbroker_utils::{to_duration, timestamp_millis, Counter};
//!
//! assert_eq!(to_duration("1m30s").as_secs(), 90);
//! assert!(timestamp_millis() > 0);
//!
//! let c = Counter::new();
//! c.inc();
//! c.inc();
//! c.dec();
//! assert_eq!((c.count(), c.max()), (1, 2));
//! ```

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

mod counter;

pub use counter::Counter;

/// Cluster node identifier
pub type NodeId = u64;

/// Milliseconds since the Unix epoch
pub type TimestampMillis = i64;

/// Current time in milliseconds since the Unix epoch
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Formats a millisecond timestamp in local time, empty for non-positive values
#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    if t <= 0 {
        return String::new();
    }
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(t) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        _ => String::new(),
    }
}

/// Parses a duration written as a sequence of `<number><unit>` pairs.
///
/// Units: `ms`, `s`, `m`, `h`, `d`. A bare number is read as milliseconds.
/// Returns `None` when the text is not a valid duration.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim().to_ascii_lowercase();
    if text.is_empty() {
        return None;
    }
    if let Ok(ms) = text.parse::<u64>() {
        return Some(Duration::from_millis(ms));
    }

    let mut total: u64 = 0;
    let mut rest = text.as_str();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(factor)?)?;
        rest = &rest[unit_len..];
    }
    Some(Duration::from_millis(total))
}

/// Lenient form of [`parse_duration`], invalid text yields a zero duration
#[inline]
pub fn to_duration(text: &str) -> Duration {
    parse_duration(text).unwrap_or_default()
}

/// Deserializes a duration from a string such as `"30s"`, or from an integer of milliseconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(s) => parse_duration(&s).ok_or_else(|| de::Error::custom(format!("invalid duration `{s}`"))),
    }
}

/// Serializes a duration as whole milliseconds
pub fn serialize_duration<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_millis() as u64)
}

/// Timestamp of the last occurrence of some event, 0 when it never happened
#[derive(Debug, Default)]
pub struct AtomicTimestamp(AtomicI64);

impl AtomicTimestamp {
    #[inline]
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    #[inline]
    pub fn set(&self, t: TimestampMillis) {
        self.0.store(t, Ordering::SeqCst);
    }

    #[inline]
    pub fn set_now(&self) {
        self.set(timestamp_millis());
    }

    #[inline]
    pub fn get(&self) -> Option<TimestampMillis> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            t => Some(t),
        }
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

impl Clone for AtomicTimestamp {
    fn clone(&self) -> Self {
        Self(AtomicI64::new(self.0.load(Ordering::SeqCst)))
    }
}

impl Serialize for AtomicTimestamp {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.get() {
            Some(t) => s.serialize_str(&format_timestamp_millis(t)),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d1ms"), Some(Duration::from_millis(86_400_001)));
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 5S "), Some(Duration::from_secs(5)));

        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("10"), Some(Duration::from_millis(10)));
        assert_eq!(to_duration("bogus"), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_duration() {
        #[derive(Deserialize)]
        struct Conf {
            #[serde(deserialize_with = "deserialize_duration")]
            ttl: Duration,
        }

        let c: Conf = serde_json::from_str(r#"{"ttl": "5s"}"#).unwrap();
        assert_eq!(c.ttl, Duration::from_secs(5));
        let c: Conf = serde_json::from_str(r#"{"ttl": 1500}"#).unwrap();
        assert_eq!(c.ttl, Duration::from_millis(1500));
        assert!(serde_json::from_str::<Conf>(r#"{"ttl": "five"}"#).is_err());
    }

    #[test]
    fn test_atomic_timestamp() {
        let t = AtomicTimestamp::new();
        assert_eq!(t.get(), None);
        t.set(42);
        assert_eq!(t.get(), Some(42));
        t.clear();
        assert_eq!(t.get(), None);
        assert_eq!(format_timestamp_millis(0), "");
    }
}
