//! Fixed-interval status refresh gate and heartbeat.

use std::time::{Duration, Instant};

/// True once at least `interval` has passed since `last_refresh`.
#[inline]
pub fn should_refresh(now: Instant, last_refresh: Instant, interval: Duration) -> bool {
    now.saturating_duration_since(last_refresh) >= interval
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub indicator_on: bool,
    pub last_toggled: Instant,
}

/// Polled every control tick; opens at most once per interval.
#[derive(Debug, Clone)]
pub struct MonitorScheduler {
    interval: Duration,
    last_refresh: Instant,
    heartbeat: HeartbeatState,
}

impl MonitorScheduler {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_refresh: start,
            heartbeat: HeartbeatState {
                indicator_on: false,
                last_toggled: start,
            },
        }
    }

    /// Apply the gate; when it opens, toggle the heartbeat and record `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !should_refresh(now, self.last_refresh, self.interval) {
            return false;
        }
        self.last_refresh = now;
        self.heartbeat = HeartbeatState {
            indicator_on: !self.heartbeat.indicator_on,
            last_toggled: now,
        };
        tracing::trace!(heartbeat = self.heartbeat.indicator_on, "refresh gate open");
        true
    }

    pub fn heartbeat(&self) -> HeartbeatState {
        self.heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(999, false)]
    #[case(1000, true)]
    #[case(5000, true)]
    fn gate_threshold(#[case] elapsed_ms: u64, #[case] open: bool) {
        let t0 = Instant::now();
        let now = t0 + Duration::from_millis(elapsed_ms);
        assert_eq!(should_refresh(now, t0, Duration::from_secs(1)), open);
    }

    #[test]
    fn clock_going_backwards_keeps_the_gate_closed() {
        let t0 = Instant::now() + Duration::from_secs(10);
        assert!(!should_refresh(t0 - Duration::from_secs(5), t0, Duration::from_secs(1)));
    }

    #[test]
    fn heartbeat_toggles_once_per_interval() {
        let t0 = Instant::now();
        let mut s = MonitorScheduler::new(Duration::from_secs(1), t0);
        let mut toggles = 0;
        let mut last = s.heartbeat().indicator_on;
        for ms in (0..=3_500).step_by(50) {
            if s.poll(t0 + Duration::from_millis(ms)) {
                assert_ne!(s.heartbeat().indicator_on, last);
                last = s.heartbeat().indicator_on;
                toggles += 1;
            }
        }
        assert_eq!(toggles, 3);
        assert_eq!(s.heartbeat().last_toggled, t0 + Duration::from_secs(3));
    }
}
