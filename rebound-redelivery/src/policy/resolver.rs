//! Selection of the policy that handles a failure

use std::sync::Arc;

use rebound_common::{Failure, FailureType};

use super::{ExceptionPolicy, ExceptionPolicyTable};

/// The policy chosen for a failure, and why
#[derive(Debug, Clone)]
pub struct ResolvedPolicy<'a> {
    /// Declaration index of the policy within its table
    pub index: usize,
    pub policy: &'a Arc<ExceptionPolicy>,
    /// The ancestor of the failure's type that the policy declared
    pub matched: &'a FailureType,
}

/// Resolves failures against an [`ExceptionPolicyTable`].
///
/// The most specific declared type wins: the failure's own type is tried
/// first, then each ancestor in turn. Resolution is pure and never blocks.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionPolicyResolver<'t> {
    table: &'t ExceptionPolicyTable,
}

impl<'t> ExceptionPolicyResolver<'t> {
    #[must_use]
    pub const fn new(table: &'t ExceptionPolicyTable) -> Self {
        Self { table }
    }

    /// Find the policy handling `failure`, or `None` if it should propagate
    #[must_use]
    pub fn resolve<'f>(&self, failure: &'f Failure) -> Option<ResolvedPolicy<'f>>
    where
        't: 'f,
    {
        self.resolve_type(failure.kind())
    }

    #[must_use]
    pub fn resolve_type<'f>(&self, kind: &'f FailureType) -> Option<ResolvedPolicy<'f>>
    where
        't: 'f,
    {
        kind.ancestors().find_map(|ty| {
            self.table
                .lookup(ty.name())
                .map(|(index, policy)| ResolvedPolicy {
                    index,
                    policy,
                    matched: ty,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn hierarchy() -> (FailureType, FailureType, FailureType) {
        let exception = FailureType::exception();
        let runtime = exception.subtype("RuntimeException");
        let illegal = runtime.subtype("IllegalArgumentException");
        (exception, runtime, illegal)
    }

    #[test]
    fn subtype_beats_supertype_regardless_of_order() {
        let table = ExceptionPolicyTable::new()
            .with(ExceptionPolicy::builder(["Exception"]).build().unwrap())
            .with(
                ExceptionPolicy::builder(["IllegalArgumentException"])
                    .build()
                    .unwrap(),
            );
        let resolver = ExceptionPolicyResolver::new(&table);
        let (_, runtime, illegal) = hierarchy();

        let failure = Failure::new(illegal, "Forced");
        let resolved = resolver.resolve(&failure).unwrap();
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.matched.name(), "IllegalArgumentException");

        let failure = Failure::new(runtime, "other");
        let resolved = resolver.resolve(&failure).unwrap();
        assert_eq!(resolved.index, 0);
        assert_eq!(resolved.matched.name(), "Exception");
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let table = ExceptionPolicyTable::new()
            .with(
                ExceptionPolicy::builder(["RuntimeException"])
                    .handled(true)
                    .build()
                    .unwrap(),
            )
            .with(ExceptionPolicy::builder(["RuntimeException"]).build().unwrap());

        let (_, runtime, _) = hierarchy();
        let resolved = ExceptionPolicyResolver::new(&table)
            .resolve_type(&runtime)
            .unwrap();
        assert_eq!(resolved.index, 0);
        assert!(resolved.policy.handled());
    }

    #[test]
    fn uncovered_failures_resolve_to_none() {
        let table = ExceptionPolicyTable::new().with(
            ExceptionPolicy::builder(["IllegalArgumentException"])
                .build()
                .unwrap(),
        );
        let io = FailureType::exception().subtype("IOException");

        assert!(
            ExceptionPolicyResolver::new(&table)
                .resolve(&Failure::new(io, "eof"))
                .is_none()
        );
        assert!(
            ExceptionPolicyResolver::new(&ExceptionPolicyTable::new())
                .resolve_type(&FailureType::exception())
                .is_none()
        );
    }
}
