//! Shared building blocks for the rebound redelivery engine.
//!
//! This crate holds the types every other rebound crate speaks in:
//! - [`Exchange`]: the mutable unit of work flowing through a route
//! - [`Value`]: dynamic payload used for bodies, headers and properties
//! - [`Failure`] and [`FailureType`]: failures carrying an explicit type hierarchy
//! - [`Route`] and [`Endpoint`]: the collaborators a route hands to the engine

pub mod exchange;
pub mod failure;
pub mod logging;
pub mod route;
pub mod value;

pub use exchange::{Exchange, ExchangeId};
pub use failure::{Ancestors, Failure, FailureType};
pub use route::{Endpoint, FnRoute, Route};
pub use tracing;
pub use value::Value;

/// Process-wide lifecycle signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
