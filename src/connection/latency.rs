//! Simulated Latency
//!
//! Handshakes, teardowns and sends pause for a short, bounded time to stand
//! in for real network scheduling. The pause is a pluggable strategy so
//! tests run with no delay at all and simulations can add jitter.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Where in the connection lifecycle a pause happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    /// Between the first and second step of an open
    Handshake,
    /// Between the first and second step of a close
    Teardown,
    /// After every successful send
    Transmit,
}

/// A strategy for simulated latency.
pub trait Latency: Send + Sync + fmt::Debug {
    /// How long to pause at `kind`.
    fn delay(&self, kind: DelayKind) -> Duration;

    /// Blocks the current thread for [`delay`](Self::delay).
    fn pause(&self, kind: DelayKind) {
        let delay = self.delay(kind);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// No latency at all. The default, and what tests use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLatency;

impl Latency for NoLatency {
    fn delay(&self, _kind: DelayKind) -> Duration {
        Duration::ZERO
    }
}

/// Uniformly random latency in `[min, max]`.
///
/// Handshakes wait the full range, teardowns half of it and transmissions a
/// tenth, mirroring how much slower connection setup is than a single send.
#[derive(Debug, Clone, Copy)]
pub struct RandomLatency {
    min: Duration,
    max: Duration,
}

impl RandomLatency {
    /// Creates a strategy; the bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Latency for RandomLatency {
    fn delay(&self, kind: DelayKind) -> Duration {
        let base = if self.min == self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        };

        match kind {
            DelayKind::Handshake => base,
            DelayKind::Teardown => base / 2,
            DelayKind::Transmit => base / 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_latency() {
        assert_eq!(NoLatency.delay(DelayKind::Handshake), Duration::ZERO);
        assert_eq!(NoLatency.delay(DelayKind::Transmit), Duration::ZERO);
    }

    #[test]
    fn test_random_latency_bounds() {
        let latency = RandomLatency::new(Duration::from_micros(100), Duration::from_micros(1000));
        for _ in 0..100 {
            let d = latency.delay(DelayKind::Handshake);
            assert!(d >= Duration::from_micros(100) && d <= Duration::from_micros(1000));

            let t = latency.delay(DelayKind::Transmit);
            assert!(t <= Duration::from_micros(100));
        }
    }

    #[test]
    fn test_random_latency_swaps_bounds() {
        let latency = RandomLatency::new(Duration::from_millis(5), Duration::from_millis(1));
        assert_eq!(latency.min(), Duration::from_millis(1));
        assert_eq!(latency.max(), Duration::from_millis(5));
    }

    #[test]
    fn test_fixed_latency() {
        let latency = RandomLatency::new(Duration::from_micros(50), Duration::from_micros(50));
        assert_eq!(latency.delay(DelayKind::Teardown), Duration::from_micros(25));
    }
}
