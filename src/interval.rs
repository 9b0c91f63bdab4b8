//! C1 — the pure interval policy deciding how long to wait before a host's
//! next scan.

use chrono::{DateTime, Utc};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// How long to wait before the next scan of a host, given the time it was
/// last seen alive.
///
/// Monotone non-decreasing in `now - last_seen`: the longer a host has been
/// silent, the less often we bother it.
pub fn scan_interval(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let Some(last_seen) = last_seen else {
        return Duration::from_secs(30 * MINUTE);
    };

    let elapsed = (now - last_seen).num_seconds().max(0) as u64;

    match elapsed {
        e if e <= DAY => Duration::from_secs(30 * MINUTE),
        e if e <= 2 * DAY => Duration::from_secs(HOUR),
        e if e <= 3 * DAY => Duration::from_secs(2 * HOUR),
        e if e <= 7 * DAY => Duration::from_secs(4 * HOUR),
        e if e <= 14 * DAY => Duration::from_secs(6 * HOUR),
        e if e <= 28 * DAY => Duration::from_secs(12 * HOUR),
        _ => Duration::from_secs(24 * HOUR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn ago(now: DateTime<Utc>, d: ChronoDuration) -> DateTime<Utc> {
        now - d
    }

    #[test]
    fn never_seen_is_thirty_minutes() {
        let now = Utc::now();
        assert_eq!(scan_interval(None, now), Duration::from_secs(30 * 60));
    }

    #[test]
    fn recently_seen_is_thirty_minutes() {
        let now = Utc::now();
        let last_seen = ago(now, ChronoDuration::hours(1));
        assert_eq!(scan_interval(Some(last_seen), now), Duration::from_secs(30 * 60));
    }

    #[test]
    fn boundaries_step_up() {
        let now = Utc::now();
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::hours(30))), now),
            Duration::from_secs(HOUR)
        );
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::days(2) + ChronoDuration::hours(1))), now),
            Duration::from_secs(2 * HOUR)
        );
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::days(5))), now),
            Duration::from_secs(4 * HOUR)
        );
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::days(10))), now),
            Duration::from_secs(6 * HOUR)
        );
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::days(20))), now),
            Duration::from_secs(12 * HOUR)
        );
        assert_eq!(
            scan_interval(Some(ago(now, ChronoDuration::days(40))), now),
            Duration::from_secs(24 * HOUR)
        );
    }

    #[test]
    fn monotone_non_decreasing() {
        let now = Utc::now();
        let samples = [1u64, 25, 49, 73, 169, 337, 673, 1000];
        let mut prev = Duration::from_secs(0);
        for hours in samples {
            let interval = scan_interval(Some(ago(now, ChronoDuration::hours(hours as i64))), now);
            assert!(interval >= prev, "interval regressed at {hours}h");
            prev = interval;
        }
    }
}
