//! Failures raised by routes, with an explicit type hierarchy.
//!
//! A [`FailureType`] is a tag plus an optional parent tag, so matching a
//! failure against declared policy types never relies on host reflection:
//!
//! ```text
//! Exception
//! └── RuntimeException
//!     └── IllegalArgumentException
//! ```

use core::fmt::{self, Debug, Display, Formatter};
use std::sync::{Arc, LazyLock};

use thiserror::Error;

static EXCEPTION: LazyLock<FailureType> = LazyLock::new(|| FailureType::root("Exception"));

struct TypeNode {
    name: Arc<str>,
    parent: Option<FailureType>,
}

/// A node in a failure type hierarchy.
///
/// Cloning is cheap; the hierarchy is shared.
#[derive(Clone)]
pub struct FailureType(Arc<TypeNode>);

impl FailureType {
    /// Create a type with no parent
    pub fn root(name: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(TypeNode {
            name: name.into(),
            parent: None,
        }))
    }

    /// The conventional root type every built-in failure derives from
    #[must_use]
    pub fn exception() -> Self {
        EXCEPTION.clone()
    }

    /// Create a child type of `self`
    #[must_use]
    pub fn subtype(&self, name: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(TypeNode {
            name: name.into(),
            parent: Some(self.clone()),
        }))
    }

    /// Build a hierarchy from a root-first path such as
    /// `Exception/RuntimeException/IllegalArgumentException`.
    ///
    /// Returns `None` if the path has no segments.
    #[must_use]
    pub fn from_lineage(lineage: &str) -> Option<Self> {
        let mut segments = lineage
            .split(['/', '>'])
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let root = Self::root(segments.next()?);
        Some(segments.fold(root, |parent, name| parent.subtype(name)))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.0.parent.as_ref()
    }

    /// Iterate from this type up to its root, most-derived first
    #[must_use]
    pub const fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Whether this type is `name` or derives from it
    #[must_use]
    pub fn is_a(&self, name: &str) -> bool {
        self.ancestors().any(|ty| ty.name() == name)
    }

    /// Number of ancestors above this type
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors().count() - 1
    }

    /// Root-first rendering, the inverse of [`FailureType::from_lineage`]
    #[must_use]
    pub fn lineage(&self) -> String {
        let mut names = self.ancestors().map(Self::name).collect::<Vec<_>>();
        names.reverse();
        names.join("/")
    }
}

impl PartialEq for FailureType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.name() == other.name() && self.parent() == other.parent())
    }
}

impl Eq for FailureType {}

impl Debug for FailureType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "FailureType({})", self.lineage())
    }
}

impl Display for FailureType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.name())
    }
}

/// Iterator over a type and its ancestors
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a FailureType>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a FailureType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// A failure raised while processing an exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    kind: FailureType,
    message: String,
    #[source]
    cause: Option<Box<Failure>>,
}

impl Failure {
    pub fn new(kind: FailureType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the failure that led to this one
    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> &FailureType {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// The innermost failure in the cause chain
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }

    /// Whether this failure's type is `name` or derives from it
    #[must_use]
    pub fn is_a(&self, name: &str) -> bool {
        self.kind.is_a(name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn illegal_argument() -> FailureType {
        FailureType::exception()
            .subtype("RuntimeException")
            .subtype("IllegalArgumentException")
    }

    #[test]
    fn ancestors_walk_most_derived_first() {
        let ty = illegal_argument();
        let names = ty.ancestors().map(FailureType::name).collect::<Vec<_>>();

        assert_eq!(
            names,
            ["IllegalArgumentException", "RuntimeException", "Exception"]
        );
        assert_eq!(ty.depth(), 2);
        assert!(ty.is_a("RuntimeException"));
        assert!(!ty.is_a("IOException"));
    }

    #[test]
    fn lineage_round_trips() {
        let ty = illegal_argument();
        assert_eq!(ty.lineage(), "Exception/RuntimeException/IllegalArgumentException");
        assert_eq!(FailureType::from_lineage(&ty.lineage()), Some(ty));
        assert_eq!(
            FailureType::from_lineage("Exception > IOException")
                .map(|t| t.name().to_string()),
            Some("IOException".to_string())
        );
        assert_eq!(FailureType::from_lineage(" / "), None);
    }

    #[test]
    fn structurally_equal_types_compare_equal() {
        assert_eq!(illegal_argument(), illegal_argument());
        assert_ne!(
            FailureType::root("IllegalArgumentException"),
            illegal_argument()
        );
    }

    #[test]
    fn failure_display_and_causes() {
        let io = Failure::new(FailureType::exception().subtype("IOException"), "disk gone");
        let failure = Failure::new(illegal_argument(), "Forced").with_cause(io.clone());

        assert_eq!(failure.to_string(), "IllegalArgumentException: Forced");
        assert_eq!(failure.cause(), Some(&io));
        assert_eq!(failure.root_cause(), &io);
        assert!(failure.is_a("Exception"));

        let source = std::error::Error::source(&failure).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("IOException: disk gone"));
    }
}
