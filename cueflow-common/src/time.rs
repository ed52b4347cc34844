//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as milliseconds since the Unix epoch (feed timestamp format)
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
