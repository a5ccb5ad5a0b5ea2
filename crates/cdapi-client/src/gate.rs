//! Update throttle
//!
//! Keeps callers from refreshing vehicle data faster than the upstream
//! service tolerates. The gate performs no I/O; the client records a success
//! only after a fetch actually completed.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Minimum-interval gate for data refreshes
#[derive(Debug, Clone)]
pub struct UpdateGate {
    min_interval: Duration,
    last_success_at: Option<DateTime<Utc>>,
}

impl UpdateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_success_at: None,
        }
    }

    /// True iff nothing was fetched yet or more than `min_interval` has
    /// elapsed since the last successful fetch.
    pub fn should_fetch(&self, now: DateTime<Utc>) -> bool {
        match self.last_success_at {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed > self.min_interval,
                // clock went backwards
                Err(_) => false,
            },
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_first_call_fetches() {
        let gate = UpdateGate::new(Duration::from_secs(600));
        assert!(gate.should_fetch(t0()));
        assert_eq!(gate.last_success_at(), None);
    }

    #[test]
    fn test_within_interval_is_throttled() {
        let mut gate = UpdateGate::new(Duration::from_secs(600));
        gate.record_success(t0());

        for secs in [1, 60, 599, 600] {
            let now = t0() + chrono::Duration::seconds(secs);
            assert!(!gate.should_fetch(now), "fetch allowed after {secs}s");
        }
    }

    #[test]
    fn test_after_interval_fetches() {
        let mut gate = UpdateGate::new(Duration::from_secs(600));
        gate.record_success(t0());

        let just_after = t0() + chrono::Duration::milliseconds(600_001);
        assert!(gate.should_fetch(just_after));
        assert!(gate.should_fetch(t0() + chrono::Duration::hours(3)));
    }

    #[test]
    fn test_record_success_moves_window() {
        let mut gate = UpdateGate::new(Duration::from_secs(60));
        gate.record_success(t0());
        let later = t0() + chrono::Duration::seconds(61);
        assert!(gate.should_fetch(later));

        gate.record_success(later);
        assert!(!gate.should_fetch(later + chrono::Duration::seconds(30)));
        assert_eq!(gate.last_success_at(), Some(later));
    }

    #[test]
    fn test_clock_going_backwards_does_not_fetch() {
        let mut gate = UpdateGate::new(Duration::from_secs(60));
        gate.record_success(t0());
        assert!(!gate.should_fetch(t0() - chrono::Duration::seconds(5)));
    }
}
