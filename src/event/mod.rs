pub mod parse;

use std::fmt;

use serde::Serialize;

/// Severity value that marks a feed record as countable.
pub const SUCCESS_SEVERITY: &str = "success";

/// Delimiter joining the group key fields on the wire.
pub const KEY_DELIMITER: char = '.';

/// Group key identifying same-kind records within a window.
///
/// The title is stored already normalized (ASCII alphanumerics only).
/// Device and country are kept verbatim, so a `.` inside either field
/// makes the joined wire form ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub device: String,
    pub title: String,
    pub country: String,
}

impl GroupKey {
    /// Builds a key, normalizing the raw title.
    pub fn new(device: impl Into<String>, raw_title: &str, country: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            title: normalize_title(raw_title),
            country: country.into(),
        }
    }

    /// Splits a `device.title.country` string back into its fields.
    ///
    /// Splits on the first two delimiters only; anything after the second
    /// delimiter belongs to the country.
    pub fn from_joined(joined: &str) -> Option<Self> {
        let mut parts = joined.splitn(3, KEY_DELIMITER);
        let device = parts.next()?;
        let title = parts.next()?;
        let country = parts.next()?;

        Some(Self {
            device: device.to_string(),
            title: title.to_string(),
            country: country.to_string(),
        })
    }

    /// Appends the `device.title.country` form to `out`.
    pub fn write_joined(&self, out: &mut String) {
        out.push_str(&self.device);
        out.push(KEY_DELIMITER);
        out.push_str(&self.title);
        out.push(KEY_DELIMITER);
        out.push_str(&self.country);
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
            self.device, self.title, self.country
        )
    }
}

/// Unit of work carried from deserialization workers to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEvent {
    pub key: GroupKey,
    pub window: i64,
}

/// One output row of a flushed window.
///
/// Field order is the serialized order: `device`, `sps`, `title`, `country`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRecord {
    pub device: String,
    pub sps: u64,
    pub title: String,
    pub country: String,
}

impl AggregateRecord {
    /// Builds a record from a group key and its count.
    pub fn from_key(key: GroupKey, count: u64) -> Self {
        Self {
            device: key.device,
            sps: count,
            title: key.title,
            country: key.country,
        }
    }
}

/// Removes every character outside `[A-Za-z0-9]`.
pub fn normalize_title(title: &str) -> String {
    title.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Computes the event-time window for a millisecond timestamp.
///
/// Uses floor division so timestamps before the epoch land in negative
/// windows instead of collapsing into window 0.
pub fn window_index(epoch_ms: i64, interval_secs: u64) -> i64 {
    let width_ms = i64::try_from(interval_secs.saturating_mul(1000))
        .unwrap_or(i64::MAX)
        .max(1);
    epoch_ms.div_euclid(width_ms)
}
