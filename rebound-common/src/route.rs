//! Collaborators the engine calls into: the route continuation that
//! (re)processes an exchange, and the endpoints exchanges are sent to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{exchange::Exchange, failure::Failure};

/// The continuation resumed for every processing attempt of an exchange
#[async_trait]
pub trait Route: Send + Sync {
    /// Process the exchange, returning the failure raised if any
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure>;
}

#[async_trait]
impl<R: Route + ?Sized> Route for Arc<R> {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        (**self).process(exchange).await
    }
}

/// Adapts a synchronous closure into a [`Route`]
pub struct FnRoute<F>(F);

impl<F> FnRoute<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Route for FnRoute<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        (self.0)(exchange)
    }
}

/// A destination exchanges can be delivered to, such as a dead letter store
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn send(&self, exchange: &Exchange) -> Result<(), Failure>;
}
