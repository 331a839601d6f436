//! Retrieval windows aligned to a metric's period.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricWindowCalculator<C = SystemClock> {
    clock: C,
}

impl<C: Clock> MetricWindowCalculator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Compute `(start, end)` for one retrieval.
    ///
    /// With a non-zero period, "now" is first moved back half a period and
    /// rounded to the nearest period boundary, so successive scrapes ask for
    /// the same buckets.
    pub fn calculate(&self, period: Duration, length: Duration, delay: Duration) -> (SystemTime, SystemTime) {
        let mut now = self.clock.now();
        if !period.is_zero() {
            let shifted = now.checked_sub(period / 2).unwrap_or(UNIX_EPOCH);
            now = round_to_period(shifted, period);
        }
        let start = now.checked_sub(length + delay).unwrap_or(UNIX_EPOCH);
        let end = now.checked_sub(delay).unwrap_or(UNIX_EPOCH);
        (start, end)
    }
}

/// Round to the nearest multiple of `period` since the epoch; halfway rounds up.
fn round_to_period(t: SystemTime, period: Duration) -> SystemTime {
    let since = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let p = period.as_nanos();
    let rem = since % p;
    let rounded = if rem * 2 >= p { since - rem + p } else { since - rem };
    let secs = (rounded / 1_000_000_000) as u64;
    let nanos = (rounded % 1_000_000_000) as u32;
    UNIX_EPOCH + Duration::new(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2024-01-01T00:00:00Z
    const DAY: u64 = 1_704_067_200;

    fn at(h: u64, m: u64, s: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(DAY + h * 3600 + m * 60 + s)
    }

    fn calc(now: SystemTime) -> MetricWindowCalculator<FixedClock> {
        MetricWindowCalculator::new(FixedClock(now))
    }

    #[test]
    fn zero_period_is_exact() {
        let now = at(12, 7, 30);
        let (start, end) = calc(now).calculate(Duration::ZERO, Duration::from_secs(600), Duration::ZERO);
        assert_eq!(end, now);
        assert_eq!(start, now - Duration::from_secs(600));
    }

    #[test]
    fn period_aligns_to_boundaries() {
        let (start, end) = calc(at(12, 7, 30)).calculate(
            Duration::from_secs(300),
            Duration::from_secs(600),
            Duration::ZERO,
        );
        assert_eq!(end, at(12, 5, 0));
        assert_eq!(start, at(11, 55, 0));
    }

    #[test]
    fn delay_shifts_both_ends() {
        let (start, end) = calc(at(12, 7, 30)).calculate(
            Duration::from_secs(300),
            Duration::from_secs(300),
            Duration::from_secs(120),
        );
        assert_eq!(end, at(12, 3, 0));
        assert_eq!(start, at(11, 58, 0));
    }

    #[test]
    fn rounding_goes_to_nearest_boundary() {
        let period = Duration::from_secs(300);
        let len = Duration::from_secs(300);
        // 12:04:59 after the half-period shift rounds up to 12:05.
        let (_, end) = calc(at(12, 7, 29)).calculate(period, len, Duration::ZERO);
        assert_eq!(end, at(12, 5, 0));
        // 12:02:29 after the shift rounds down to 12:00.
        let (_, end) = calc(at(12, 4, 59)).calculate(period, len, Duration::ZERO);
        assert_eq!(end, at(12, 0, 0));
    }

    #[test]
    fn successive_scrapes_in_one_period_agree() {
        let period = Duration::from_secs(60);
        let len = Duration::from_secs(60);
        let a = calc(at(9, 1, 0)).calculate(period, len, Duration::ZERO);
        let b = calc(at(9, 1, 59)).calculate(period, len, Duration::ZERO);
        assert_eq!(a, b);
    }
}
