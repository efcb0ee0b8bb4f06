use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::model::DigestKind;

/// Resolves `now` into `tz`'s local time and decides whether a digest subscription with the
/// given target `HH:MM` and weekday rule is due. `daily` dispatches every day; `weekly` only
/// on Monday; every other kind is timer-driven elsewhere and is never due here.
pub fn digest_is_due(
    now_utc: DateTime<Utc>, tz: Tz, kind: DigestKind, target_hour: u32, target_minute: u32,
    window_minutes: u32,
) -> bool {
    if !matches!(kind, DigestKind::Daily | DigestKind::Weekly) {
        return false;
    }

    let local = now_utc.with_timezone(&tz);
    if local.hour() != target_hour {
        return false;
    }

    let delta = (local.minute() as i64 - target_minute as i64).abs();
    if delta > window_minutes as i64 {
        return false;
    }

    match kind {
        DigestKind::Daily => true,
        DigestKind::Weekly => local.weekday() == Weekday::Mon,
        DigestKind::Alerts | DigestKind::Extreme => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn honors_timezone_offset_for_daily_digest() {
        // 08:00 America/New_York is 13:00 UTC during EST.
        let due_at_13_utc = Utc.with_ymd_and_hms(2026, 1, 15, 13, 2, 0).unwrap();
        assert!(digest_is_due(
            due_at_13_utc,
            "America/New_York".parse().unwrap(),
            DigestKind::Daily,
            8,
            0,
            5
        ));

        let not_due_at_8_utc = Utc.with_ymd_and_hms(2026, 1, 15, 8, 2, 0).unwrap();
        assert!(!digest_is_due(
            not_due_at_8_utc,
            "America/New_York".parse().unwrap(),
            DigestKind::Daily,
            8,
            0,
            5
        ));
    }

    #[test]
    fn weekly_digest_never_fires_off_monday() {
        // 2026-01-15 is a Thursday.
        let thursday_local_match = Utc.with_ymd_and_hms(2026, 1, 15, 6, 3, 0).unwrap();
        assert!(!digest_is_due(
            thursday_local_match,
            "Europe/Kyiv".parse().unwrap(),
            DigestKind::Weekly,
            8,
            0,
            5
        ));

        // 2026-01-12 is the preceding Monday.
        let monday_local_match = Utc.with_ymd_and_hms(2026, 1, 12, 6, 3, 0).unwrap();
        assert!(digest_is_due(
            monday_local_match,
            "Europe/Kyiv".parse().unwrap(),
            DigestKind::Weekly,
            8,
            0,
            5
        ));
    }

    #[test]
    fn alerts_and_extreme_subscriptions_are_never_timer_due() {
        let now = Utc.with_ymd_and_hms(2026, 1, 12, 8, 0, 0).unwrap();
        assert!(!digest_is_due(now, Tz::UTC, DigestKind::Alerts, 8, 0, 5));
        assert!(!digest_is_due(now, Tz::UTC, DigestKind::Extreme, 8, 0, 5));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2026, 1, 12, 8, 5, 0).unwrap();
        assert!(digest_is_due(now, Tz::UTC, DigestKind::Daily, 8, 0, 5));

        let now = Utc.with_ymd_and_hms(2026, 1, 12, 8, 6, 0).unwrap();
        assert!(!digest_is_due(now, Tz::UTC, DigestKind::Daily, 8, 0, 5));
    }
}
