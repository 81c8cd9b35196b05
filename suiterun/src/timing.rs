//! Time helpers shared by monitors and the pool.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// `hh:mm:ss` for log lines.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Duration between a job's reported start and finish.
///
/// Zero when either timestamp is missing or they are out of order; the value
/// is only ever reported, never used for timeouts.
pub fn build_duration(
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
) -> Duration {
    match (started, finished) {
        (Some(started), Some(finished)) => (finished - started).to_std().unwrap_or_default(),
        _ => Duration::ZERO,
    }
}
