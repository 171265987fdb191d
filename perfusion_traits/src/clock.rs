use std::thread;
use std::time::{Duration, Instant};

/// Time source for the control loop.
///
/// Exchange phases, status refresh and the heartbeat all measure elapsed
/// time through this trait so tests can run an hour-long experiment without
/// sleeping.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block for `d`. Simulated clocks advance instead.
    fn sleep(&self, d: Duration);

    /// Time elapsed since `earlier`; zero if `earlier` is in the future.
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Wall-clock-independent real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Manually driven clock. Clones share the same time, so a test can keep
    /// one handle while the controller owns another.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        start: Instant,
        elapsed: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            if let Ok(mut elapsed) = self.elapsed.lock() {
                *elapsed = elapsed.saturating_add(d);
            }
        }

        /// Simulated time since construction.
        pub fn offset(&self) -> Duration {
            self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.start + self.offset()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

}
