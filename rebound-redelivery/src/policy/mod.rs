//! Exception policies and their resolution.
//!
//! - [`ExceptionPolicy`]: how failures of given types are redelivered and disposed of
//! - [`ExceptionPolicyTable`]: the ordered, immutable set of declared policies
//! - [`ExceptionPolicyResolver`]: picks the most specific policy for a failure
//! - [`RedeliveryDelay`]: fixed or exponential delay between attempts

pub mod delay;
pub mod exception;
pub mod resolver;
pub mod table;

pub use delay::RedeliveryDelay;
pub use exception::{ExceptionPolicy, ExceptionPolicyBuilder};
pub use resolver::{ExceptionPolicyResolver, ResolvedPolicy};
pub use table::ExceptionPolicyTable;
