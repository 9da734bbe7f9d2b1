//! Declarative exception policy configuration
//!
//! ```ron
//! redelivery: (
//!     policies: [
//!         (
//!             exceptions: ["IllegalArgumentException"],
//!             retry_while: "${body.areWeCool} == 'no'",
//!             redelivery_delay: Fixed(millis: 0),
//!             handled: true,
//!             failure_destination: "mock:error",
//!         ),
//!     ],
//! )
//! ```

use serde::{Deserialize, Serialize};

use rebound_common::logging::LogLevel;

use crate::{
    error::ConfigError,
    policy::{ExceptionPolicy, ExceptionPolicyTable, RedeliveryDelay},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedeliveryConfig {
    /// Policies in declaration order; earlier policies win ties
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl RedeliveryConfig {
    /// Build the policy table described by this configuration.
    ///
    /// # Errors
    ///
    /// If any policy is invalid; the error names the offending policy's index.
    pub fn build_table(&self) -> Result<ExceptionPolicyTable, ConfigError> {
        self.policies
            .iter()
            .enumerate()
            .map(|(index, policy)| {
                policy.build().map_err(|source| ConfigError::Policy {
                    index,
                    source: Box::new(source),
                })
            })
            .collect()
    }
}

/// One declared policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Failure type names this policy handles
    pub exceptions: Vec<String>,

    /// Expression deciding whether to keep redelivering
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_while: Option<String>,

    /// Default: `Fixed(millis: 1000)`
    #[serde(default)]
    pub redelivery_delay: RedeliveryDelay,

    /// Unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub maximum_redeliveries: Option<u32>,

    /// Default: `false`
    #[serde(default)]
    pub handled: bool,

    /// Endpoint exhausted exchanges are routed to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_destination: Option<String>,

    /// Default: `Debug`
    #[serde(default = "defaults::retry_attempted_log_level")]
    pub retry_attempted_log_level: LogLevel,

    /// Default: `Warn`
    #[serde(default = "defaults::exhausted_log_level")]
    pub exhausted_log_level: LogLevel,
}

impl PolicyConfig {
    /// # Errors
    ///
    /// If the policy names no exception types, its retry expression is
    /// malformed, or its delay is out of range.
    pub fn build(&self) -> Result<ExceptionPolicy, ConfigError> {
        let mut builder = ExceptionPolicy::builder(self.exceptions.iter().map(String::as_str))
            .redelivery_delay(self.redelivery_delay)
            .handled(self.handled)
            .retry_attempted_log_level(self.retry_attempted_log_level)
            .exhausted_log_level(self.exhausted_log_level);

        if let Some(expression) = &self.retry_while {
            builder = builder.retry_while_expression(expression.as_str());
        }

        if let Some(maximum) = self.maximum_redeliveries {
            builder = builder.maximum_redeliveries(maximum);
        }

        if let Some(destination) = &self.failure_destination {
            builder = builder.to(destination.as_str());
        }

        builder.build()
    }
}

mod defaults {
    use rebound_common::logging::LogLevel;

    pub const fn retry_attempted_log_level() -> LogLevel {
        LogLevel::Debug
    }

    pub const fn exhausted_log_level() -> LogLevel {
        LogLevel::Warn
    }
}
