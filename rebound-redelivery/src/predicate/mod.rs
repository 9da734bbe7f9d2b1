//! Retry predicates, re-evaluated against the exchange after every failure.

mod expression;

use std::borrow::Cow;

use rebound_common::Exchange;
use thiserror::Error;

pub use expression::ExpressionPredicate;

/// Decides whether a failed exchange may be redelivered.
///
/// Evaluation may observe side effects of previous attempts, and may have
/// side effects of its own. It is invoked exactly once per failed attempt.
pub trait Predicate: Send + Sync {
    /// # Errors
    ///
    /// If the predicate cannot produce a boolean for this exchange. The
    /// engine treats this as fatal for the exchange and stops redelivering.
    fn evaluate(&self, exchange: &Exchange) -> Result<bool, PredicateError>;

    /// Human readable rendering used in logs
    fn describe(&self) -> Cow<'_, str> {
        Cow::Borrowed("<predicate>")
    }
}

impl<F> Predicate for F
where
    F: Fn(&Exchange) -> Result<bool, PredicateError> + Send + Sync,
{
    fn evaluate(&self, exchange: &Exchange) -> Result<bool, PredicateError> {
        self(exchange)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// The expression text could not be parsed.
    #[error("Malformed expression '{expression}' at offset {position}: {reason}")]
    Malformed {
        expression: String,
        position: usize,
        reason: String,
    },

    /// An operator was applied to operands it cannot compare.
    #[error("Cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// The expression evaluated to something other than a boolean.
    #[error("Expected a boolean result, found {found}")]
    NotBoolean { found: &'static str },

    /// Any other evaluation failure raised by a custom predicate.
    #[error("{0}")]
    Evaluation(String),
}
