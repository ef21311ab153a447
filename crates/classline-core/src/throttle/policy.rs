//! Pure throttle policy decisions.
//!
//! Everything here is a function of a policy and explicit timestamps, with
//! randomness injected through `Rng`. The stateful side (reading rolling
//! counters from the delivery queue) lives in [`super::Throttle`].

use chrono::{DateTime, Duration, Timelike, Utc};
use classline_storage::models::ThrottlePolicy;
use rand::Rng;

/// Jitter ceiling, in seconds, applied when a send is pushed past the
/// quiet-hour boundary. Spreads the backlog instead of releasing every
/// tenant's queue at the exact boundary instant.
const QUIET_RESUME_JITTER_SECS: i64 = 300;

/// Hour of day in the tenant's local time
fn local_hour(policy: &ThrottlePolicy, at: DateTime<Utc>) -> i32 {
    let shifted = at + Duration::minutes(policy.tz_offset_minutes as i64);
    shifted.hour() as i32
}

/// Whether `at` falls inside the policy's quiet-hour window `[start, end)`.
///
/// A window with `start > end` wraps past midnight ("22:00 to 08:00" spans
/// two calendar days). A window with `start == end` is treated as disabled.
pub fn in_quiet_hours(policy: &ThrottlePolicy, at: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (policy.quiet_start_hour, policy.quiet_end_hour) else {
        return false;
    };
    if start == end {
        return false;
    }

    let hour = local_hour(policy, at);
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// The next instant the quiet window ends, at or after `at`.
///
/// Returns None when no quiet window is configured. With the midnight-wrap
/// window, an `at` of 23:00 resolves to 08:00 the next calendar day.
pub fn quiet_hours_end(policy: &ThrottlePolicy, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let end = policy.quiet_end_hour?;
    policy.quiet_start_hour?;

    let offset = Duration::minutes(policy.tz_offset_minutes as i64);
    let shifted = at + offset;

    let end_naive = shifted.date_naive().and_hms_opt(end as u32, 0, 0)?;
    let end_shifted = DateTime::<Utc>::from_naive_utc_and_offset(end_naive, Utc);

    let candidate = if end_shifted > shifted {
        end_shifted
    } else {
        end_shifted + Duration::days(1)
    };

    Some(candidate - offset)
}

/// Randomized inter-message spacing drawn uniformly from
/// `[min_delay, max_delay]`.
///
/// The jitter is the anti-throttling measure: fixed intervals are detectable
/// and penalized by the channel.
pub fn spacing_delay<R: Rng + ?Sized>(policy: &ThrottlePolicy, rng: &mut R) -> Duration {
    let min = policy.min_delay_secs.max(0) as i64;
    let max = (policy.max_delay_secs as i64).max(min);
    Duration::seconds(rng.gen_range(min..=max))
}

/// Compute the next send slot for a tenant.
///
/// Chains after the latest already-scheduled entry so scheduled sends never
/// pile up at the same instant, then pushes past the quiet window (plus a
/// small jitter) if the candidate lands inside it.
pub fn next_send_slot<R: Rng + ?Sized>(
    policy: &ThrottlePolicy,
    now: DateTime<Utc>,
    last_scheduled: Option<DateTime<Utc>>,
    rng: &mut R,
) -> DateTime<Utc> {
    let base = match last_scheduled {
        Some(tail) if tail > now => tail,
        _ => now,
    };

    let mut candidate = base + spacing_delay(policy, rng);

    if in_quiet_hours(policy, candidate) {
        if let Some(end) = quiet_hours_end(policy, candidate) {
            candidate = end + Duration::seconds(rng.gen_range(0..=QUIET_RESUME_JITTER_SECS));
        }
    }

    candidate
}

/// Whether the rolling send counts have reached the policy caps
pub fn caps_reached(policy: &ThrottlePolicy, sent_last_hour: i64, sent_last_day: i64) -> bool {
    if sent_last_hour >= policy.max_per_hour as i64 {
        return true;
    }

    if let Some(per_day) = policy.max_per_day {
        if sent_last_day >= per_day as i64 {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy() -> ThrottlePolicy {
        ThrottlePolicy::default()
    }

    fn quiet_policy(start: i32, end: i32) -> ThrottlePolicy {
        ThrottlePolicy {
            quiet_start_hour: Some(start),
            quiet_end_hour: Some(end),
            ..ThrottlePolicy::default()
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_no_quiet_window_configured() {
        assert!(!in_quiet_hours(&policy(), at(3, 0)));
        assert_eq!(quiet_hours_end(&policy(), at(3, 0)), None);
    }

    #[test]
    fn test_quiet_window_same_day() {
        let p = quiet_policy(13, 15);
        assert!(!in_quiet_hours(&p, at(12, 59)));
        assert!(in_quiet_hours(&p, at(13, 0)));
        assert!(in_quiet_hours(&p, at(14, 30)));
        assert!(!in_quiet_hours(&p, at(15, 0)));
    }

    #[test]
    fn test_quiet_window_wraps_midnight() {
        let p = quiet_policy(22, 8);
        assert!(in_quiet_hours(&p, at(22, 0)));
        assert!(in_quiet_hours(&p, at(23, 30)));
        assert!(in_quiet_hours(&p, at(0, 15)));
        assert!(in_quiet_hours(&p, at(7, 59)));
        assert!(!in_quiet_hours(&p, at(8, 0)));
        assert!(!in_quiet_hours(&p, at(12, 0)));
        assert!(!in_quiet_hours(&p, at(21, 59)));
    }

    #[test]
    fn test_equal_bounds_disable_window() {
        let p = quiet_policy(9, 9);
        assert!(!in_quiet_hours(&p, at(9, 0)));
    }

    #[test]
    fn test_quiet_hours_respect_tz_offset() {
        // Window 22-8 local, tenant is UTC+3: 20:00 UTC is 23:00 local.
        let p = ThrottlePolicy {
            tz_offset_minutes: 180,
            ..quiet_policy(22, 8)
        };
        assert!(in_quiet_hours(&p, at(20, 0)));
        assert!(!in_quiet_hours(&p, at(6, 0)));
    }

    #[test]
    fn test_quiet_end_same_morning() {
        let p = quiet_policy(22, 8);
        let end = quiet_hours_end(&p, at(2, 30)).unwrap();
        assert_eq!(end, at(8, 0));
    }

    #[test]
    fn test_quiet_end_crosses_midnight() {
        let p = quiet_policy(22, 8);
        let end = quiet_hours_end(&p, at(23, 0)).unwrap();
        assert_eq!(end, at(8, 0) + Duration::days(1));
    }

    #[test]
    fn test_spacing_within_bounds() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let delay = spacing_delay(&p, &mut rng);
            assert!(delay >= Duration::seconds(30));
            assert!(delay <= Duration::seconds(120));
        }
    }

    #[test]
    fn test_degenerate_spacing_is_exact() {
        let p = ThrottlePolicy {
            min_delay_secs: 30,
            max_delay_secs: 30,
            ..ThrottlePolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10 {
            assert_eq!(spacing_delay(&p, &mut rng), Duration::seconds(30));
        }
    }

    #[test]
    fn test_slot_chains_after_queue_tail() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(42);
        let now = at(10, 0);
        let tail = at(10, 45);

        let slot = next_send_slot(&p, now, Some(tail), &mut rng);
        assert!(slot >= tail + Duration::seconds(30));
        assert!(slot <= tail + Duration::seconds(120));
    }

    #[test]
    fn test_slot_ignores_past_tail() {
        let p = policy();
        let mut rng = StdRng::seed_from_u64(42);
        let now = at(10, 0);
        let stale_tail = at(9, 0);

        let slot = next_send_slot(&p, now, Some(stale_tail), &mut rng);
        assert!(slot >= now + Duration::seconds(30));
        assert!(slot <= now + Duration::seconds(120));
    }

    #[test]
    fn test_slot_never_lands_in_quiet_window() {
        let p = quiet_policy(22, 8);
        let mut rng = StdRng::seed_from_u64(99);
        let end = at(8, 0) + Duration::days(1);

        for _ in 0..200 {
            let slot = next_send_slot(&p, at(23, 0), None, &mut rng);
            assert!(!in_quiet_hours(&p, slot));
            assert!(slot >= end);
        }
    }

    #[test]
    fn test_slot_during_morning_quiet_hours() {
        let p = quiet_policy(22, 8);
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..200 {
            let slot = next_send_slot(&p, at(3, 0), None, &mut rng);
            assert!(slot >= at(8, 0));
            assert!(slot <= at(8, 0) + Duration::seconds(QUIET_RESUME_JITTER_SECS));
        }
    }

    #[test]
    fn test_caps_reached() {
        let p = policy();

        assert!(!caps_reached(&p, 19, 0));
        assert!(caps_reached(&p, 20, 0));
        assert!(caps_reached(&p, 25, 0));

        let with_daily = ThrottlePolicy {
            max_per_day: Some(100),
            ..ThrottlePolicy::default()
        };
        assert!(!caps_reached(&with_daily, 0, 99));
        assert!(caps_reached(&with_daily, 0, 100));

        // Hourly cap of one: a single send exhausts the window.
        let strict = ThrottlePolicy {
            max_per_hour: 1,
            ..ThrottlePolicy::default()
        };
        assert!(!caps_reached(&strict, 0, 0));
        assert!(caps_reached(&strict, 1, 0));
    }
}
