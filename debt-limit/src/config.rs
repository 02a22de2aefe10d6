use std::time::Duration;

use quanta::Clock;

use crate::DebtLimiter;

/// The three parameters a [`DebtLimiter`] is built from.
///
/// Nothing here can be changed on a live limiter; build a new one instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Requests admitted per `period`. Values below 1 are treated as 1.
    pub rate: i64,
    /// Requests that may be admitted back to back after idling.
    pub max_burst: u32,
    /// The window `rate` is measured over.
    pub period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: 100,
            max_burst: 0,
            period: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn new(rate: i64, max_burst: u32, period: Duration) -> Self {
        Self {
            rate,
            max_burst,
            period,
        }
    }

    /// `rate`, coerced to at least 1.
    pub fn effective_rate(&self) -> i64 {
        self.rate.max(1)
    }

    /// Nominal spacing between admissions, `period / rate`.
    pub fn per_request(&self) -> Duration {
        Duration::from_nanos(self.per_request_nanos() as u64)
    }

    /// Magnitude of the most negative debt, `max_burst * per_request`.
    pub fn max_burst_credit(&self) -> Duration {
        Duration::from_nanos(self.max_burst_credit_nanos() as u64)
    }

    pub(crate) fn per_request_nanos(&self) -> i64 {
        let period = i64::try_from(self.period.as_nanos()).unwrap_or(i64::MAX);
        period / self.effective_rate()
    }

    pub(crate) fn max_burst_credit_nanos(&self) -> i64 {
        self.per_request_nanos()
            .saturating_mul(i64::from(self.max_burst))
    }

    /// Builds a limiter reading the system clock.
    pub fn build(&self) -> DebtLimiter {
        DebtLimiter::from_config(*self, Clock::new())
    }

    /// Builds a limiter reading `clock`, e.g. one from [`Clock::mock`].
    pub fn build_with_clock(&self, clock: Clock) -> DebtLimiter {
        DebtLimiter::from_config(*self, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_derives_spacing_and_credit() {
        let config = Config::new(10, 3, Duration::from_secs(1));
        assert_eq!(config.per_request(), Duration::from_millis(100));
        assert_eq!(config.max_burst_credit(), Duration::from_millis(300));
    }

    #[test]
    fn test_non_positive_rate_is_coerced() {
        for rate in [0, -1, i64::MIN] {
            let config = Config::new(rate, 1, Duration::from_millis(250));
            assert_eq!(config.effective_rate(), 1);
            assert_eq!(config.per_request(), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_zero_burst_has_no_credit() {
        let config = Config::new(5, 0, Duration::from_secs(1));
        assert_eq!(config.max_burst_credit(), Duration::ZERO);
    }

    #[test]
    fn test_huge_values_saturate() {
        let config = Config::new(1, u32::MAX, Duration::MAX);
        assert_eq!(config.per_request_nanos(), i64::MAX);
        assert_eq!(config.max_burst_credit_nanos(), i64::MAX);
    }

    #[test]
    fn test_default() {
        let config = Config::default();
        assert_eq!(config.per_request(), Duration::from_millis(10));
        assert_eq!(config.max_burst_credit(), Duration::ZERO);
    }
}
