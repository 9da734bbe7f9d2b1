//! Delay between redelivery attempts

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How long to wait before the next redelivery attempt.
///
/// A zero delay still yields to the runtime between attempts; it never
/// retries inline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RedeliveryDelay {
    /// The same delay before every redelivery.
    Fixed {
        /// Default: 1000 milliseconds
        #[serde(default = "defaults::fixed_millis")]
        millis: u64,
    },

    /// Exponential backoff with an optional cap and jitter.
    ///
    /// The delay before redelivery `n` (1-indexed) is
    /// `min(initial * multiplier^(n - 1), max) * (1 ± jitter_factor)`.
    Backoff {
        /// Default: 1000 milliseconds
        #[serde(default = "defaults::fixed_millis")]
        initial_millis: u64,

        /// Default: 2.0
        #[serde(default = "defaults::multiplier")]
        multiplier: f64,

        /// Default: 60000 milliseconds (1 minute)
        #[serde(default = "defaults::max_millis")]
        max_millis: u64,

        /// Default: 0.0 (no jitter)
        #[serde(default)]
        jitter_factor: f64,
    },
}

impl Default for RedeliveryDelay {
    fn default() -> Self {
        Self::Fixed {
            millis: defaults::fixed_millis(),
        }
    }
}

impl RedeliveryDelay {
    /// A constant delay, saturating at `u64::MAX` milliseconds
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            millis: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Redeliver without waiting
    #[must_use]
    pub const fn none() -> Self {
        Self::Fixed { millis: 0 }
    }

    #[must_use]
    pub fn backoff(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::Backoff {
            initial_millis: u64::try_from(initial.as_millis()).unwrap_or(u64::MAX),
            multiplier,
            max_millis: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor of a backoff delay, fixed delays are unaffected
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        if let Self::Backoff { jitter_factor, .. } = &mut self {
            *jitter_factor = factor;
        }
        self
    }

    /// Check that the backoff parameters describe a usable delay.
    ///
    /// # Errors
    ///
    /// If the multiplier is below 1 or not finite, if the jitter factor lies
    /// outside `0.0..=1.0`, or if the cap is below the initial delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Fixed { .. } => Ok(()),
            Self::Backoff {
                initial_millis,
                multiplier,
                max_millis,
                jitter_factor,
            } => {
                if !multiplier.is_finite() || multiplier < 1.0 {
                    return Err(ConfigError::InvalidDelay(format!(
                        "multiplier must be at least 1, got {multiplier}"
                    )));
                }

                if !(0.0..=1.0).contains(&jitter_factor) {
                    return Err(ConfigError::InvalidDelay(format!(
                        "jitter factor must be between 0 and 1, got {jitter_factor}"
                    )));
                }

                if max_millis < initial_millis {
                    return Err(ConfigError::InvalidDelay(format!(
                        "maximum delay {max_millis}ms is below the initial delay {initial_millis}ms"
                    )));
                }

                Ok(())
            }
        }
    }

    /// Delay before the given redelivery (1-indexed)
    #[must_use]
    pub fn delay_for(&self, redelivery: u32) -> Duration {
        match *self {
            Self::Fixed { millis } => Duration::from_millis(millis),
            Self::Backoff {
                initial_millis,
                multiplier,
                max_millis,
                jitter_factor,
            } => Duration::from_millis(backoff_delay(
                redelivery,
                initial_millis,
                multiplier,
                max_millis,
                jitter_factor,
            )),
        }
    }
}

/// `min(initial * multiplier^(redelivery - 1), max) * (1 ± jitter_factor)`
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn backoff_delay(
    redelivery: u32,
    initial_millis: u64,
    multiplier: f64,
    max_millis: u64,
    jitter_factor: f64,
) -> u64 {
    let exponent = redelivery.saturating_sub(1).min(i32::MAX as u32) as i32;
    let scaled = (initial_millis as f64) * multiplier.powi(exponent);

    // Non-finite growth saturates at the cap
    let delay = if scaled.is_finite() {
        scaled.min(max_millis as f64)
    } else {
        max_millis as f64
    };

    if jitter_factor <= 0.0 || delay <= 0.0 {
        return delay as u64;
    }

    let jitter_range = delay * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
    (delay + jitter).max(0.0) as u64
}

mod defaults {
    pub const fn fixed_millis() -> u64 {
        1000
    }

    pub const fn multiplier() -> f64 {
        2.0
    }

    pub const fn max_millis() -> u64 {
        60_000 // 1 minute
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let delay = RedeliveryDelay::fixed(Duration::from_millis(250));
        assert_eq!(delay.delay_for(1), Duration::from_millis(250));
        assert_eq!(delay.delay_for(1000), Duration::from_millis(250));
        assert_eq!(RedeliveryDelay::none().delay_for(3), Duration::ZERO);
        assert_eq!(RedeliveryDelay::default().delay_for(1), Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let delay = RedeliveryDelay::backoff(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(1000),
        );

        let delays = (1..=6)
            .map(|n| delay.delay_for(n).as_millis())
            .collect::<Vec<_>>();
        assert_eq!(delays, [100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn backoff_survives_huge_exponents() {
        let delay = RedeliveryDelay::backoff(Duration::from_secs(1), 10.0, Duration::from_secs(30));
        assert_eq!(delay.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn jitter_stays_in_range() {
        let delay = RedeliveryDelay::backoff(
            Duration::from_millis(1000),
            1.0,
            Duration::from_millis(1000),
        )
        .with_jitter(0.2);

        for _ in 0..100 {
            let millis = delay.delay_for(1).as_millis();
            assert!((800..=1200).contains(&millis), "{millis} out of range");
        }
    }

    #[test]
    fn validation() {
        assert!(RedeliveryDelay::default().validate().is_ok());
        assert!(
            RedeliveryDelay::backoff(Duration::from_millis(10), 0.5, Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(
            RedeliveryDelay::backoff(Duration::from_millis(10), f64::NAN, Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(
            RedeliveryDelay::backoff(Duration::from_millis(10), 2.0, Duration::from_secs(1))
                .with_jitter(1.5)
                .validate()
                .is_err()
        );
        assert!(
            RedeliveryDelay::backoff(Duration::from_secs(10), 2.0, Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let delay: RedeliveryDelay = ron::from_str("Backoff(initial_millis: 50)").unwrap();
        assert_eq!(
            delay,
            RedeliveryDelay::Backoff {
                initial_millis: 50,
                multiplier: 2.0,
                max_millis: 60_000,
                jitter_factor: 0.0,
            }
        );

        let delay: RedeliveryDelay = ron::from_str("Fixed(millis: 0)").unwrap();
        assert_eq!(delay, RedeliveryDelay::none());
    }
}
