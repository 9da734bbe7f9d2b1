//! A single declared exception policy

use core::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use rebound_common::{Failure, FailureType, Route, logging::LogLevel};

use super::RedeliveryDelay;
use crate::{
    error::ConfigError,
    predicate::{ExpressionPredicate, Predicate},
};

/// How failures of particular types are redelivered and finally disposed of.
///
/// Policies are immutable once built and shared between every exchange
/// processed under the same [`ExceptionPolicyTable`](super::ExceptionPolicyTable).
#[derive(Clone)]
pub struct ExceptionPolicy {
    exceptions: Vec<Arc<str>>,
    retry_while: Option<Arc<dyn Predicate>>,
    delay: RedeliveryDelay,
    maximum_redeliveries: Option<u32>,
    handled: bool,
    failure_destination: Option<Arc<str>>,
    on_redelivery: Option<Arc<dyn Route>>,
    retry_attempted_log_level: LogLevel,
    exhausted_log_level: LogLevel,
}

impl ExceptionPolicy {
    /// Start a policy matching the given failure type names
    pub fn builder<I, S>(exceptions: I) -> ExceptionPolicyBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        ExceptionPolicyBuilder {
            exceptions: exceptions.into_iter().map(Into::into).collect(),
            retry_while: None,
            expression: None,
            delay: RedeliveryDelay::default(),
            maximum_redeliveries: None,
            handled: false,
            failure_destination: None,
            on_redelivery: None,
            retry_attempted_log_level: LogLevel::Debug,
            exhausted_log_level: LogLevel::Warn,
        }
    }

    /// Failure type names this policy was declared for, in declaration order
    #[must_use]
    pub fn exceptions(&self) -> &[Arc<str>] {
        &self.exceptions
    }

    #[must_use]
    pub fn retry_while(&self) -> Option<&dyn Predicate> {
        self.retry_while.as_deref()
    }

    #[must_use]
    pub const fn delay(&self) -> &RedeliveryDelay {
        &self.delay
    }

    /// `None` means unbounded; redelivery is then governed by the predicate
    /// and cancellation alone.
    #[must_use]
    pub const fn maximum_redeliveries(&self) -> Option<u32> {
        self.maximum_redeliveries
    }

    #[must_use]
    pub const fn handled(&self) -> bool {
        self.handled
    }

    #[must_use]
    pub fn failure_destination(&self) -> Option<&str> {
        self.failure_destination.as_deref()
    }

    #[must_use]
    pub fn on_redelivery(&self) -> Option<&dyn Route> {
        self.on_redelivery.as_deref()
    }

    #[must_use]
    pub const fn retry_attempted_log_level(&self) -> LogLevel {
        self.retry_attempted_log_level
    }

    #[must_use]
    pub const fn exhausted_log_level(&self) -> LogLevel {
        self.exhausted_log_level
    }

    /// The declared type matching `kind`, walking from most-derived to root
    #[must_use]
    pub fn matched_type<'a>(&self, kind: &'a FailureType) -> Option<&'a FailureType> {
        kind.ancestors()
            .find(|ty| self.exceptions.iter().any(|name| &**name == ty.name()))
    }

    /// Whether this policy covers the failure's type or one of its ancestors
    #[must_use]
    pub fn matches(&self, failure: &Failure) -> bool {
        self.matched_type(failure.kind()).is_some()
    }

    /// Whether another redelivery is allowed after `attempts` failed attempts.
    ///
    /// Attempt `n` is redelivery `n - 1`, so a bound of 3 permits 4 attempts.
    #[must_use]
    pub fn allows_redelivery(&self, attempts: u32) -> bool {
        self.maximum_redeliveries
            .is_none_or(|max| attempts.saturating_sub(1) < max)
    }

    /// Redeliveries left after `attempts` failed attempts, `None` if unbounded
    #[must_use]
    pub fn remaining_redeliveries(&self, attempts: u32) -> Option<u32> {
        self.maximum_redeliveries
            .map(|max| max.saturating_sub(attempts.saturating_sub(1)))
    }
}

impl Debug for ExceptionPolicy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ExceptionPolicy")
            .field("exceptions", &self.exceptions)
            .field(
                "retry_while",
                &self.retry_while.as_ref().map(|p| p.describe().into_owned()),
            )
            .field("delay", &self.delay)
            .field("maximum_redeliveries", &self.maximum_redeliveries)
            .field("handled", &self.handled)
            .field("failure_destination", &self.failure_destination)
            .field("on_redelivery", &self.on_redelivery.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExceptionPolicy`]
#[must_use]
pub struct ExceptionPolicyBuilder {
    exceptions: Vec<Arc<str>>,
    retry_while: Option<Arc<dyn Predicate>>,
    expression: Option<String>,
    delay: RedeliveryDelay,
    maximum_redeliveries: Option<u32>,
    handled: bool,
    failure_destination: Option<Arc<str>>,
    on_redelivery: Option<Arc<dyn Route>>,
    retry_attempted_log_level: LogLevel,
    exhausted_log_level: LogLevel,
}

impl ExceptionPolicyBuilder {
    /// Keep redelivering while `predicate` holds
    pub fn retry_while(mut self, predicate: impl Predicate + 'static) -> Self {
        self.retry_while = Some(Arc::new(predicate));
        self.expression = None;
        self
    }

    /// Keep redelivering while the expression holds, parsed when the policy is built
    pub fn retry_while_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self.retry_while = None;
        self
    }

    pub const fn redelivery_delay(mut self, delay: RedeliveryDelay) -> Self {
        self.delay = delay;
        self
    }

    pub const fn maximum_redeliveries(mut self, maximum: u32) -> Self {
        self.maximum_redeliveries = Some(maximum);
        self
    }

    pub const fn handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }

    /// Name of the endpoint exhausted exchanges are sent to
    pub fn to(mut self, destination: impl Into<Arc<str>>) -> Self {
        self.failure_destination = Some(destination.into());
        self
    }

    /// Run `route` against the exchange before every redelivery
    pub fn on_redelivery(mut self, route: impl Route + 'static) -> Self {
        self.on_redelivery = Some(Arc::new(route));
        self
    }

    pub const fn retry_attempted_log_level(mut self, level: LogLevel) -> Self {
        self.retry_attempted_log_level = level;
        self
    }

    pub const fn exhausted_log_level(mut self, level: LogLevel) -> Self {
        self.exhausted_log_level = level;
        self
    }

    /// Validate and build the policy.
    ///
    /// # Errors
    ///
    /// If no exception type was named, the retry expression is malformed, or
    /// the delay is out of range.
    pub fn build(self) -> Result<ExceptionPolicy, ConfigError> {
        let exceptions = self
            .exceptions
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .collect::<Vec<_>>();

        if exceptions.is_empty() {
            return Err(ConfigError::NoExceptionTypes);
        }

        self.delay.validate()?;

        let retry_while = match self.expression {
            Some(expression) => Some(
                Arc::new(ExpressionPredicate::parse(&expression)?) as Arc<dyn Predicate>
            ),
            None => self.retry_while,
        };

        Ok(ExceptionPolicy {
            exceptions,
            retry_while,
            delay: self.delay,
            maximum_redeliveries: self.maximum_redeliveries,
            handled: self.handled,
            failure_destination: self.failure_destination,
            on_redelivery: self.on_redelivery,
            retry_attempted_log_level: self.retry_attempted_log_level,
            exhausted_log_level: self.exhausted_log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rebound_common::Exchange;

    use super::*;
    use crate::predicate::PredicateError;

    fn illegal_argument() -> FailureType {
        FailureType::exception()
            .subtype("RuntimeException")
            .subtype("IllegalArgumentException")
    }

    #[test]
    fn matches_declared_type_and_subtypes() {
        let policy = ExceptionPolicy::builder(["RuntimeException"]).build().unwrap();

        let failure = Failure::new(illegal_argument(), "Forced");
        assert!(policy.matches(&failure));
        assert_eq!(
            policy.matched_type(failure.kind()).map(FailureType::name),
            Some("RuntimeException")
        );

        let io = Failure::new(FailureType::exception().subtype("IOException"), "eof");
        assert!(!policy.matches(&io));
    }

    #[test]
    fn redelivery_bound() {
        let policy = ExceptionPolicy::builder(["Exception"])
            .maximum_redeliveries(3)
            .build()
            .unwrap();

        assert!(policy.allows_redelivery(1));
        assert!(policy.allows_redelivery(3));
        assert!(!policy.allows_redelivery(4));
        assert_eq!(policy.remaining_redeliveries(1), Some(3));
        assert_eq!(policy.remaining_redeliveries(4), Some(0));

        let unbounded = ExceptionPolicy::builder(["Exception"]).build().unwrap();
        assert!(unbounded.allows_redelivery(u32::MAX));
        assert_eq!(unbounded.remaining_redeliveries(10), None);
    }

    #[test]
    fn zero_redeliveries_means_a_single_attempt() {
        let policy = ExceptionPolicy::builder(["Exception"])
            .maximum_redeliveries(0)
            .build()
            .unwrap();
        assert!(!policy.allows_redelivery(1));
    }

    #[test]
    fn builder_validation() {
        assert!(matches!(
            ExceptionPolicy::builder(Vec::<String>::new()).build(),
            Err(ConfigError::NoExceptionTypes)
        ));
        assert!(matches!(
            ExceptionPolicy::builder([" "]).build(),
            Err(ConfigError::NoExceptionTypes)
        ));
        assert!(matches!(
            ExceptionPolicy::builder(["Exception"])
                .retry_while_expression("${body} ==")
                .build(),
            Err(ConfigError::InvalidPredicate(PredicateError::Malformed { .. }))
        ));
        assert!(matches!(
            ExceptionPolicy::builder(["Exception"])
                .redelivery_delay(RedeliveryDelay::backoff(
                    Duration::from_millis(1),
                    0.0,
                    Duration::from_secs(1)
                ))
                .build(),
            Err(ConfigError::InvalidDelay(_))
        ));
    }

    #[test]
    fn expression_predicate_is_compiled() {
        let policy = ExceptionPolicy::builder(["IllegalArgumentException"])
            .retry_while_expression("${body.areWeCool} == 'no'")
            .redelivery_delay(RedeliveryDelay::none())
            .handled(true)
            .to("mock:error")
            .build()
            .unwrap();

        let predicate = policy.retry_while().unwrap();
        assert_eq!(predicate.describe(), "${body.areWeCool} == 'no'");

        let exchange = Exchange::new(rebound_common::Value::map().with("areWeCool", "no"));
        assert_eq!(predicate.evaluate(&exchange), Ok(true));
        assert!(policy.handled());
        assert_eq!(policy.failure_destination(), Some("mock:error"));
    }

    #[test]
    fn debug_omits_closures() {
        let policy = ExceptionPolicy::builder(["Exception"])
            .retry_while(|_: &Exchange| Ok::<_, PredicateError>(true))
            .build()
            .unwrap();

        let rendered = format!("{policy:?}");
        assert!(rendered.contains("<predicate>"));
        assert!(rendered.contains("Exception"));
    }
}
