//! Terminal handling of an exchange once redelivery stops.

use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use rebound_common::{Exchange, Failure, event_at, redelivery};
use thiserror::Error;

use crate::{
    endpoint::EndpointRegistry,
    error::{cancelled_failure_type, predicate_failure_type},
    policy::ExceptionPolicy,
    predicate::PredicateError,
    state::{
        DISPOSITION, EXHAUSTED, FAILURE_CAUSE, FAILURE_DESTINATION, FAILURE_DESTINATION_ERROR,
        RedeliveryExt,
    },
};

/// How an exchange left the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// The route eventually succeeded.
    Completed,
    /// Redelivery stopped and the failure was marked handled.
    Handled,
    /// Redelivery stopped and the failure was handed back to the caller.
    Failed,
    /// No policy covered the failure.
    Propagated,
    /// Redelivery could not be scheduled.
    Fatal,
}

impl Disposition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Handled => "handled",
            Self::Failed => "failed",
            Self::Propagated => "propagated",
            Self::Fatal => "fatal",
        }
    }
}

impl Display for Disposition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown disposition '{0}'")]
pub struct UnknownDisposition(String);

impl FromStr for Disposition {
    type Err = UnknownDisposition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "handled" => Ok(Self::Handled),
            "failed" => Ok(Self::Failed),
            "propagated" => Ok(Self::Propagated),
            "fatal" => Ok(Self::Fatal),
            other => Err(UnknownDisposition(other.to_string())),
        }
    }
}

/// Why the redelivery loop stopped short of success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The bound was reached or the retry predicate returned false.
    Exhausted,
    /// The retry predicate failed to evaluate.
    PredicateFailed(PredicateError),
    /// The loop was cancelled.
    Cancelled,
}

/// Applies a policy's terminal handling to an exchange.
///
/// Finalizing is idempotent: once an exchange carries a disposition, further
/// calls leave it untouched and report the recorded outcome.
#[derive(Debug, Clone, Copy)]
pub struct FailureDisposition<'a> {
    endpoints: &'a EndpointRegistry,
}

impl<'a> FailureDisposition<'a> {
    #[must_use]
    pub const fn new(endpoints: &'a EndpointRegistry) -> Self {
        Self { endpoints }
    }

    /// Finalize an exchange whose redelivery stopped under `policy`.
    ///
    /// A handled failure is cleared from the exchange and kept in the
    /// [`FAILURE_CAUSE`] property; an unhandled one stays attached. Either way
    /// the exchange is sent to the policy's failure destination, if any.
    pub async fn finalize(
        &self,
        exchange: &mut Exchange,
        policy: &ExceptionPolicy,
        termination: &Termination,
    ) -> Disposition {
        if let Some(disposition) = exchange.disposition() {
            return disposition;
        }

        let cause = match termination {
            Termination::Exhausted => None,
            Termination::PredicateFailed(error) => {
                Some(Failure::new(predicate_failure_type(), error.to_string()))
            }
            Termination::Cancelled => {
                Some(Failure::new(cancelled_failure_type(), "Redelivery cancelled"))
            }
        };

        if let Some(outer) = cause {
            let wrapped = match exchange.take_exception() {
                Some(failure) => outer.with_cause(failure),
                None => outer,
            };
            exchange.set_exception(wrapped);
        }

        exchange.set_property(EXHAUSTED, true);

        let disposition = if policy.handled() {
            if let Some(failure) = exchange.take_exception() {
                exchange.set_property(FAILURE_CAUSE, failure.to_string());
            }
            Disposition::Handled
        } else {
            Disposition::Failed
        };
        exchange.set_property(DISPOSITION, disposition.as_str());

        event_at!(
            policy.exhausted_log_level(),
            exchange = %exchange.id(),
            disposition = %disposition,
            cause = ?termination,
            "Redelivery stopped"
        );

        if let Some(destination) = policy.failure_destination() {
            self.deliver(exchange, destination).await;
        }

        disposition
    }

    /// Record a successful completion
    pub fn complete(&self, exchange: &mut Exchange) -> Disposition {
        record(exchange, Disposition::Completed)
    }

    /// Record a failure no policy covered; nothing is routed anywhere
    pub fn propagate(&self, exchange: &mut Exchange) -> Disposition {
        record(exchange, Disposition::Propagated)
    }

    /// Record a failure to schedule redelivery; nothing is routed anywhere
    pub fn fatal(&self, exchange: &mut Exchange) -> Disposition {
        record(exchange, Disposition::Fatal)
    }

    async fn deliver(&self, exchange: &mut Exchange, destination: &str) {
        exchange.set_property(FAILURE_DESTINATION, destination);

        let result = match self.endpoints.get(destination) {
            Some(endpoint) => endpoint.send(exchange).await,
            None => Err(Failure::new(
                rebound_common::FailureType::exception(),
                format!("No endpoint registered as {destination}"),
            )),
        };

        if let Err(error) = result {
            redelivery!(
                level = WARN,
                "Failed to deliver exchange {} to {destination}: {error}",
                exchange.id()
            );
            exchange.set_property(FAILURE_DESTINATION_ERROR, error.to_string());
        }
    }
}


fn record(exchange: &mut Exchange, disposition: Disposition) -> Disposition {
    if let Some(existing) = exchange.disposition() {
        return existing;
    }

    exchange.set_property(DISPOSITION, disposition.as_str());
    disposition
}
