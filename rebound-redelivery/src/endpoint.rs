//! Named endpoints failed exchanges can be routed to.
//!
//! - **Lock-free**: `DashMap` backs the registry so endpoints can be looked
//!   up from many redelivery loops at once
//! - [`CaptureEndpoint`] keeps exchanges in memory, acting as a dead letter store
//! - [`LogEndpoint`] just logs what it receives

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rebound_common::{Endpoint, Exchange, Failure, event_at, logging::LogLevel};

/// Registry of endpoints, keyed by name
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Arc<DashMap<Arc<str>, Arc<dyn Endpoint>>>,
}

impl core::fmt::Debug for EndpointRegistry {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names = self.names();
        names.sort();
        fmt.debug_struct("EndpointRegistry")
            .field("endpoints", &names)
            .finish()
    }
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `endpoint` under `name`, returning the endpoint it replaced
    pub fn register(
        &self,
        name: impl Into<Arc<str>>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.insert(name.into(), endpoint)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Stores every exchange it receives
#[derive(Debug, Default)]
pub struct CaptureEndpoint {
    received: Mutex<Vec<Exchange>>,
}

impl CaptureEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of everything received so far
    #[must_use]
    pub fn received(&self) -> Vec<Exchange> {
        self.received.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    /// Drain everything received so far
    pub fn take(&self) -> Vec<Exchange> {
        core::mem::take(&mut *self.received.lock())
    }
}

#[async_trait]
impl Endpoint for CaptureEndpoint {
    async fn send(&self, exchange: &Exchange) -> Result<(), Failure> {
        self.received.lock().push(exchange.clone());
        Ok(())
    }
}

/// Logs every exchange it receives at a configurable level
#[derive(Debug, Clone)]
pub struct LogEndpoint {
    name: Arc<str>,
    level: LogLevel,
}

impl LogEndpoint {
    pub fn new(name: impl Into<Arc<str>>, level: LogLevel) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }
}

#[async_trait]
impl Endpoint for LogEndpoint {
    async fn send(&self, exchange: &Exchange) -> Result<(), Failure> {
        let failure = exchange
            .exception()
            .map_or_else(|| "none".to_string(), ToString::to_string);

        event_at!(
            self.level,
            endpoint = %self.name,
            exchange = %exchange.id(),
            body = %exchange.body(),
            failure = %failure,
            "Exchange received"
        );

        Ok(())
    }
}
