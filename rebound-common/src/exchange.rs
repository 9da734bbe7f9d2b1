//! The unit of work flowing through a route.

use core::fmt::{self, Display, Formatter};
use std::time::SystemTime;

use ahash::AHashMap;
use ulid::Ulid;

use crate::{failure::Failure, value::Value};

/// Identifier of an exchange, unique and sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(Ulid);

impl ExchangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ExchangeId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A single in-flight message.
///
/// The exchange is exclusively owned by whichever flow is currently
/// processing it, so none of its state is synchronised.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: ExchangeId,
    body: Value,
    headers: AHashMap<String, Value>,
    properties: AHashMap<String, Value>,
    exception: Option<Failure>,
    created_at: SystemTime,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl Exchange {
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            id: ExchangeId::new(),
            body: body.into(),
            headers: AHashMap::default(),
            properties: AHashMap::default(),
            exception: None,
            created_at: SystemTime::now(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ExchangeId {
        self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    pub const fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = body.into();
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    #[must_use]
    pub const fn headers(&self) -> &AHashMap<String, Value> {
        &self.headers
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    #[must_use]
    pub const fn properties(&self) -> &AHashMap<String, Value> {
        &self.properties
    }

    /// The failure currently attached to this exchange, if any
    #[must_use]
    pub const fn exception(&self) -> Option<&Failure> {
        self.exception.as_ref()
    }

    pub fn set_exception(&mut self, failure: Failure) {
        self.exception = Some(failure);
    }

    pub const fn take_exception(&mut self) -> Option<Failure> {
        self.exception.take()
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.exception.is_some()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::failure::FailureType;

    #[test]
    fn exception_lifecycle() {
        let mut exchange = Exchange::new("payload");
        assert!(!exchange.is_failed());

        let failure = Failure::new(FailureType::exception(), "boom");
        exchange.set_exception(failure.clone());
        assert!(exchange.is_failed());
        assert_eq!(exchange.exception(), Some(&failure));

        assert_eq!(exchange.take_exception(), Some(failure));
        assert!(!exchange.is_failed());
    }

    #[test]
    fn headers_and_properties_are_separate() {
        let mut exchange = Exchange::default();
        exchange.set_header("attempt", 1);
        exchange.set_property("attempt", "one");

        assert_eq!(exchange.header("attempt"), Some(&Value::Int(1)));
        assert_eq!(exchange.property("attempt"), Some(&Value::from("one")));
        assert_eq!(exchange.remove_header("attempt"), Some(Value::Int(1)));
        assert_eq!(exchange.header("attempt"), None);
        assert_eq!(exchange.properties().len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Exchange::default().id(), Exchange::default().id());
    }
}
