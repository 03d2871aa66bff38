//! Rate limit policies.

use crate::error::LimitError;
use std::time::Duration;

/// An immutable rate limit policy: `rate` events per `period`, with up to `burst`
/// events admitted instantaneously.
///
/// # Examples
/// ```
/// use cellrate::Limit;
/// use std::time::Duration;
///
/// let steady = Limit::per_second(10);
/// assert_eq!(steady.burst(), 10);
///
/// let bursty = Limit::new(100, Duration::from_secs(60), 150).unwrap();
/// assert_eq!(bursty.emission_interval(), Duration::from_millis(600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limit {
    rate: u32,
    #[cfg_attr(feature = "serde", serde(with = "period_millis"))]
    period: Duration,
    burst: u32,
}

impl Limit {
    /// `rate` events per second, `burst == rate`.
    pub const fn per_second(rate: u32) -> Self {
        Self { rate, period: Duration::from_secs(1), burst: rate }
    }

    /// `rate` events per minute, `burst == rate`.
    pub const fn per_minute(rate: u32) -> Self {
        Self { rate, period: Duration::from_secs(60), burst: rate }
    }

    /// `rate` events per hour, `burst == rate`.
    pub const fn per_hour(rate: u32) -> Self {
        Self { rate, period: Duration::from_secs(3600), burst: rate }
    }

    /// Create a validated limit. `burst` may exceed `rate` for traffic that tolerates
    /// short spikes above the sustained rate.
    ///
    /// # Errors
    /// Returns [`LimitError`] when `rate`, `period` or `burst` is zero.
    pub fn new(rate: u32, period: Duration, burst: u32) -> Result<Self, LimitError> {
        let limit = Self { rate, period, burst };
        limit.validate()?;
        Ok(limit)
    }

    /// Replace the burst capacity.
    ///
    /// # Errors
    /// Returns [`LimitError::ZeroBurst`] when `burst` is zero.
    pub fn with_burst(self, burst: u32) -> Result<Self, LimitError> {
        Self::new(self.rate, self.period, burst)
    }

    /// Check that the limit can drive the cell-rate arithmetic without dividing by zero.
    pub fn validate(&self) -> Result<(), LimitError> {
        if self.rate == 0 {
            return Err(LimitError::ZeroRate);
        }
        if self.period.is_zero() {
            return Err(LimitError::ZeroPeriod);
        }
        if self.burst == 0 {
            return Err(LimitError::ZeroBurst);
        }
        Ok(())
    }

    /// Sustained events per period.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Period over which `rate` events are permitted.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Time cost of a single unit (`period / rate`). Zero for a zero rate.
    pub fn emission_interval(&self) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        self.period / self.rate
    }

    /// Maximum burst slack (`emission_interval * burst`); also the longest time a
    /// key can take to return to the cold state.
    pub fn delay_variation_tolerance(&self) -> Duration {
        self.emission_interval().saturating_mul(self.burst)
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} per {:?} (burst {})", self.rate, self.period, self.burst)
    }
}

#[cfg(feature = "serde")]
mod period_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(period: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(period.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_set_burst_to_rate() {
        let s = Limit::per_second(10);
        assert_eq!((s.rate(), s.period(), s.burst()), (10, Duration::from_secs(1), 10));
        let m = Limit::per_minute(30);
        assert_eq!((m.rate(), m.period(), m.burst()), (30, Duration::from_secs(60), 30));
        let h = Limit::per_hour(7);
        assert_eq!((h.rate(), h.period(), h.burst()), (7, Duration::from_secs(3600), 7));
    }

    #[test]
    fn derived_intervals() {
        let limit = Limit::per_second(10);
        assert_eq!(limit.emission_interval(), Duration::from_millis(100));
        assert_eq!(limit.delay_variation_tolerance(), Duration::from_secs(1));

        let bursty = Limit::new(10, Duration::from_secs(1), 25).unwrap();
        assert_eq!(bursty.delay_variation_tolerance(), Duration::from_millis(2500));
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert_eq!(Limit::new(0, Duration::from_secs(1), 1), Err(LimitError::ZeroRate));
        assert_eq!(Limit::new(1, Duration::ZERO, 1), Err(LimitError::ZeroPeriod));
        assert_eq!(Limit::new(1, Duration::from_secs(1), 0), Err(LimitError::ZeroBurst));
        assert_eq!(Limit::per_second(0).validate(), Err(LimitError::ZeroRate));
        assert_eq!(Limit::per_second(0).emission_interval(), Duration::ZERO);
    }

    #[test]
    fn with_burst_keeps_rate_and_period() {
        let limit = Limit::per_minute(60).with_burst(120).unwrap();
        assert_eq!(limit.rate(), 60);
        assert_eq!(limit.period(), Duration::from_secs(60));
        assert_eq!(limit.burst(), 120);
        assert!(Limit::per_minute(60).with_burst(0).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_period_is_millis() {
        let limit = Limit::per_minute(5);
        let json = serde_json::to_value(limit).unwrap();
        assert_eq!(json["period"], 60_000);
        let back: Limit = serde_json::from_value(json).unwrap();
        assert_eq!(back, limit);
    }
}
