//! Build timing helpers
//!
//! Pure functions that can be tested without a clock.

use chrono::{DateTime, Utc};

/// Check if at least `interval_secs` have passed since `last` at `now`.
///
/// # Returns
/// `true` if the interval has elapsed (or nothing happened yet)
pub fn interval_elapsed(last: Option<DateTime<Utc>>, interval_secs: u64, now: DateTime<Utc>) -> bool {
    match last {
        Some(last) => (now - last).num_seconds() >= interval_secs as i64,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_never_happened() {
        let now = Utc::now();
        assert!(interval_elapsed(None, 300, now));
        assert!(interval_elapsed(None, 0, now));
    }

    #[test]
    fn test_recent() {
        let now = Utc::now();
        assert!(!interval_elapsed(Some(now - Duration::seconds(10)), 300, now));
    }

    #[test]
    fn test_old_and_boundary() {
        let now = Utc::now();
        assert!(interval_elapsed(Some(now - Duration::seconds(600)), 300, now));
        assert!(interval_elapsed(Some(now - Duration::seconds(300)), 300, now));
    }

    #[test]
    fn test_clock_moved_backwards() {
        let now = Utc::now();
        assert!(!interval_elapsed(Some(now + Duration::seconds(60)), 300, now));
    }
}
