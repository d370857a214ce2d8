//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp for use in file names (no colons).
#[must_use]
pub fn file_stamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H-%M-%S").to_string()
}
