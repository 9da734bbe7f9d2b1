//! Per-submission redelivery bookkeeping, mirrored onto the exchange.

use core::fmt::{self, Display, Formatter};
use std::time::Duration;

use rebound_common::{Exchange, Failure, Value};

use crate::disposition::Disposition;

/// Exchange property holding the number of failed attempts
pub const REDELIVERY_COUNTER: &str = "rebound.redelivery.counter";
/// Exchange property holding the last scheduled delay in milliseconds
pub const LAST_DELAY_MS: &str = "rebound.redelivery.last_delay_ms";
/// Exchange property holding the cumulative scheduled delay in milliseconds
pub const ELAPSED_MS: &str = "rebound.redelivery.elapsed_ms";
/// Exchange property set once redelivery has been given up
pub const EXHAUSTED: &str = "rebound.redelivery.exhausted";
/// Exchange property recording how the exchange was finally disposed of
pub const DISPOSITION: &str = "rebound.disposition";
/// Exchange property holding the failure behind a handled exchange
pub const FAILURE_CAUSE: &str = "rebound.failure.cause";
/// Exchange property naming the endpoint a failed exchange was sent to
pub const FAILURE_DESTINATION: &str = "rebound.failure.destination";
/// Exchange property holding the error raised by the failure destination
pub const FAILURE_DESTINATION_ERROR: &str = "rebound.failure.destination_error";

/// Header set on every redelivered exchange
pub const REDELIVERED_HEADER: &str = "ReboundRedelivered";
/// Header holding the redelivery number of the current attempt
pub const REDELIVERY_COUNTER_HEADER: &str = "ReboundRedeliveryCounter";
/// Header holding the redelivery bound, when there is one
pub const REDELIVERY_MAX_COUNTER_HEADER: &str = "ReboundRedeliveryMaxCounter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Attempting,
    RetryScheduled,
    Success,
    Exhausted,
    Aborted,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Attempting => "attempting",
            Self::RetryScheduled => "retry-scheduled",
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        })
    }
}

/// State of one submission's redelivery loop.
///
/// The counter only ever increases; it is never reset while the loop runs.
#[derive(Debug, Clone)]
pub struct RedeliveryState {
    attempts: u32,
    last_failure: Option<Failure>,
    last_delay: Duration,
    elapsed: Duration,
    phase: Phase,
}

impl Default for RedeliveryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RedeliveryState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempts: 0,
            last_failure: None,
            last_delay: Duration::ZERO,
            elapsed: Duration::ZERO,
            phase: Phase::Attempting,
        }
    }

    /// Failed attempts so far
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Redeliveries performed so far
    #[must_use]
    pub const fn redeliveries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    #[must_use]
    pub const fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    #[must_use]
    pub const fn last_delay(&self) -> Duration {
        self.last_delay
    }

    /// Total delay scheduled across all redeliveries
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Count a failed attempt, returning the new counter
    pub fn record_failure(&mut self, failure: Failure) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_failure = Some(failure);
        self.phase = Phase::Attempting;
        self.attempts
    }

    pub fn record_delay(&mut self, delay: Duration) {
        self.last_delay = delay;
        self.elapsed = self.elapsed.saturating_add(delay);
        self.phase = Phase::RetryScheduled;
    }

    /// Mirror the observable parts of this state into exchange properties
    pub fn attach(&self, exchange: &mut Exchange) {
        exchange.set_property(REDELIVERY_COUNTER, self.attempts);
        exchange.set_property(LAST_DELAY_MS, millis(self.last_delay));
        exchange.set_property(ELAPSED_MS, millis(self.elapsed));
    }

    /// Remove every property and header the engine owns, so an exchange
    /// coming back from an earlier submission starts from a clean slate.
    pub fn clear(exchange: &mut Exchange) {
        for property in [
            REDELIVERY_COUNTER,
            LAST_DELAY_MS,
            ELAPSED_MS,
            EXHAUSTED,
            DISPOSITION,
            FAILURE_CAUSE,
            FAILURE_DESTINATION,
            FAILURE_DESTINATION_ERROR,
        ] {
            exchange.remove_property(property);
        }

        for header in [
            REDELIVERED_HEADER,
            REDELIVERY_COUNTER_HEADER,
            REDELIVERY_MAX_COUNTER_HEADER,
        ] {
            exchange.remove_header(header);
        }
    }

    /// Set the redelivery headers ahead of the next attempt
    pub fn mark_redelivery(&self, exchange: &mut Exchange, maximum: Option<u32>) {
        exchange.set_header(REDELIVERED_HEADER, true);
        exchange.set_header(REDELIVERY_COUNTER_HEADER, self.attempts);
        match maximum {
            Some(max) => exchange.set_header(REDELIVERY_MAX_COUNTER_HEADER, max),
            None => {
                exchange.remove_header(REDELIVERY_MAX_COUNTER_HEADER);
            }
        }
    }
}

fn millis(duration: Duration) -> Value {
    Value::Int(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

/// Read redelivery state back off an exchange
pub trait RedeliveryExt {
    /// Failed attempts recorded, zero if the exchange never failed
    fn redelivery_counter(&self) -> u32;

    fn last_redelivery_delay(&self) -> Duration;

    fn redelivery_elapsed(&self) -> Duration;

    /// How the exchange was finally disposed of, once it has been
    fn disposition(&self) -> Option<Disposition>;

    fn is_redelivered(&self) -> bool;

    fn is_redelivery_exhausted(&self) -> bool;
}

impl RedeliveryExt for Exchange {
    fn redelivery_counter(&self) -> u32 {
        self.property(REDELIVERY_COUNTER)
            .and_then(Value::as_i64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or_default()
    }

    fn last_redelivery_delay(&self) -> Duration {
        duration_property(self, LAST_DELAY_MS)
    }

    fn redelivery_elapsed(&self) -> Duration {
        duration_property(self, ELAPSED_MS)
    }

    fn disposition(&self) -> Option<Disposition> {
        self.property(DISPOSITION)
            .and_then(Value::as_str)
            .and_then(|value| value.parse().ok())
    }

    fn is_redelivered(&self) -> bool {
        self.header(REDELIVERED_HEADER)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    fn is_redelivery_exhausted(&self) -> bool {
        self.property(EXHAUSTED)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }
}

fn duration_property(exchange: &Exchange, name: &str) -> Duration {
    exchange
        .property(name)
        .and_then(Value::as_i64)
        .and_then(|millis| u64::try_from(millis).ok())
        .map(Duration::from_millis)
        .unwrap_or_default()
}
