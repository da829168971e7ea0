mod hash;

pub use hash::{compute_hash, compute_json_hash};

use chrono::{DateTime, Duration, Utc};

/// Current engine version
pub const LISTSYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get current timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert whole seconds into a chrono duration, saturating on overflow
pub fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(secs)
}
