//! Exception-driven redelivery for rebound routes.
//!
//! This crate provides:
//! - Exception policies declared per failure type, resolved most-specific first
//! - Retry predicates, including a small `${...}` expression language
//! - The [`RedeliveryProcessor`], an iterative attempt loop with timer-driven delays
//! - Terminal disposition: handled/unhandled marking and failure destinations
//! - Cancellation per exchange and engine-wide

pub mod cancel;
pub mod config;
pub mod disposition;
pub mod endpoint;
mod error;
pub mod policy;
pub mod predicate;
mod processor;
pub mod scheduler;
pub mod state;
pub mod stats;

pub use cancel::{CancelHandle, CancelToken};
pub use config::{PolicyConfig, RedeliveryConfig};
pub use disposition::{Disposition, FailureDisposition, Termination};
pub use endpoint::{CaptureEndpoint, EndpointRegistry, LogEndpoint};
pub use error::{
    ConfigError, RedeliveryError, Rejected, cancelled_failure_type, predicate_failure_type,
};
pub use policy::{
    ExceptionPolicy, ExceptionPolicyBuilder, ExceptionPolicyResolver, ExceptionPolicyTable,
    RedeliveryDelay, ResolvedPolicy,
};
pub use predicate::{ExpressionPredicate, Predicate, PredicateError};
pub use processor::{RedeliveryProcessor, RedeliveryProcessorBuilder};
pub use scheduler::{RecordingScheduler, Scheduler, SchedulingError, TokioScheduler};
pub use state::{RedeliveryExt, RedeliveryState};
pub use stats::{RedeliveryStats, StatsSnapshot};
