//! Typed error handling for redelivery.
//!
//! Outcomes are split by how they reach the caller:
//! - Unmatched and scheduling failures escape the engine directly
//! - Exhaustion, predicate errors and cancellation pass through
//!   [`FailureDisposition`](crate::disposition::FailureDisposition) first
//!
//! Configuration problems are reported separately through [`ConfigError`].

use std::sync::LazyLock;

use rebound_common::{Exchange, Failure, FailureType};
use thiserror::Error;

use crate::{predicate::PredicateError, scheduler::SchedulingError};

static ENGINE_FAILURE: LazyLock<FailureType> =
    LazyLock::new(|| FailureType::exception().subtype("RedeliveryException"));

static PREDICATE_FAILURE: LazyLock<FailureType> =
    LazyLock::new(|| ENGINE_FAILURE.subtype("PredicateEvaluationException"));

static CANCELLED: LazyLock<FailureType> =
    LazyLock::new(|| ENGINE_FAILURE.subtype("RedeliveryCancelledException"));

/// Failure type recorded on an exchange whose retry predicate could not be evaluated
#[must_use]
pub fn predicate_failure_type() -> FailureType {
    PREDICATE_FAILURE.clone()
}

/// Failure type recorded on an exchange whose redelivery was cancelled
#[must_use]
pub fn cancelled_failure_type() -> FailureType {
    CANCELLED.clone()
}

/// Why a submitted exchange did not complete successfully.
#[derive(Debug, Error)]
pub enum RedeliveryError {
    /// No exception policy covers the raised failure.
    #[error("No exception policy matches {failure}")]
    Unmatched { attempts: u32, failure: Failure },

    /// The redelivery bound was reached or the retry predicate turned false.
    #[error("Redelivery exhausted after {attempts} attempts: {failure}")]
    Exhausted { attempts: u32, failure: Failure },

    /// The retry predicate failed to evaluate.
    #[error("Retry predicate failed after {attempts} attempts: {source}")]
    PredicateEvaluation {
        attempts: u32,
        #[source]
        source: PredicateError,
        failure: Failure,
    },

    /// Redelivery was cancelled before it could finish.
    #[error("Redelivery cancelled after {attempts} attempts: {failure}")]
    Cancelled { attempts: u32, failure: Failure },

    /// The delay mechanism could not schedule the next attempt.
    #[error("Unable to schedule redelivery: {source}")]
    Scheduling {
        attempts: u32,
        #[source]
        source: SchedulingError,
        failure: Failure,
    },
}

impl RedeliveryError {
    /// The route failure behind this error
    #[must_use]
    pub const fn failure(&self) -> &Failure {
        match self {
            Self::Unmatched { failure, .. }
            | Self::Exhausted { failure, .. }
            | Self::PredicateEvaluation { failure, .. }
            | Self::Cancelled { failure, .. }
            | Self::Scheduling { failure, .. } => failure,
        }
    }

    /// Number of failed attempts recorded before giving up
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Unmatched { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::PredicateEvaluation { attempts, .. }
            | Self::Cancelled { attempts, .. }
            | Self::Scheduling { attempts, .. } => *attempts,
        }
    }

    /// Returns `true` if the failure bypassed disposition entirely.
    #[must_use]
    pub const fn is_propagated(&self) -> bool {
        matches!(self, Self::Unmatched { .. } | Self::Scheduling { .. })
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A submission that ended in failure, handing the exchange back to the caller
#[derive(Debug, Error)]
#[error("Exchange {} rejected: {error}", exchange.id())]
pub struct Rejected {
    exchange: Box<Exchange>,
    #[source]
    error: RedeliveryError,
}

impl Rejected {
    pub(crate) fn new(exchange: Exchange, error: RedeliveryError) -> Self {
        Self {
            exchange: Box::new(exchange),
            error,
        }
    }

    #[must_use]
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    #[must_use]
    pub const fn error(&self) -> &RedeliveryError {
        &self.error
    }

    #[must_use]
    pub const fn failure(&self) -> &Failure {
        self.error.failure()
    }

    #[must_use]
    pub fn into_exchange(self) -> Exchange {
        *self.exchange
    }

    #[must_use]
    pub fn into_parts(self) -> (Exchange, RedeliveryError) {
        (*self.exchange, self.error)
    }
}

/// Errors raised while building policies or the processor.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A policy must match at least one exception type.
    #[error("Exception policy does not name any exception type")]
    NoExceptionTypes,

    /// The retry predicate expression could not be compiled.
    #[error("Invalid retry predicate: {0}")]
    InvalidPredicate(#[from] PredicateError),

    /// The delay specification is out of range.
    #[error("Invalid redelivery delay: {0}")]
    InvalidDelay(String),

    /// A policy routes to an endpoint nobody registered.
    #[error("Unknown failure destination: {0}")]
    UnknownDestination(String),

    /// Error in the policy at the given declaration index.
    #[error("Exception policy #{index}: {source}")]
    Policy {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}
