//! Registry of declared exception policies

use std::sync::Arc;

use ahash::AHashMap;

use super::ExceptionPolicy;

/// Ordered exception policies, indexed by the failure type names they declare.
///
/// A table is built once per configuration unit and shared immutably by every
/// exchange processed under it. When several policies declare the same type
/// name, the earliest declaration wins.
#[derive(Debug, Clone, Default)]
pub struct ExceptionPolicyTable {
    policies: Vec<Arc<ExceptionPolicy>>,
    index: AHashMap<Arc<str>, usize>,
}

impl ExceptionPolicyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy, returning its declaration index
    pub fn push(&mut self, policy: ExceptionPolicy) -> usize {
        let position = self.policies.len();

        for name in policy.exceptions() {
            self.index.entry(Arc::clone(name)).or_insert(position);
        }

        self.policies.push(Arc::new(policy));
        position
    }

    /// Builder-style [`push`](Self::push)
    #[must_use]
    pub fn with(mut self, policy: ExceptionPolicy) -> Self {
        self.push(policy);
        self
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Arc<ExceptionPolicy>> {
        self.policies.get(position)
    }

    /// The policy declared for exactly this type name, ignoring the hierarchy
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(usize, &Arc<ExceptionPolicy>)> {
        let position = *self.index.get(name)?;
        self.policies.get(position).map(|policy| (position, policy))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExceptionPolicy>> {
        self.policies.iter()
    }

    /// Every failure destination referenced by a policy
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.policies
            .iter()
            .filter_map(|policy| policy.failure_destination())
    }
}

impl FromIterator<ExceptionPolicy> for ExceptionPolicyTable {
    fn from_iter<T: IntoIterator<Item = ExceptionPolicy>>(iter: T) -> Self {
        iter.into_iter().fold(Self::new(), Self::with)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn policy(names: &[&str]) -> ExceptionPolicy {
        ExceptionPolicy::builder(names.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn first_declaration_wins() {
        let table = ExceptionPolicyTable::new()
            .with(policy(&["IOException", "TimeoutException"]))
            .with(policy(&["TimeoutException"]));

        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("TimeoutException").map(|(i, _)| i), Some(0));
        assert_eq!(table.lookup("IOException").map(|(i, _)| i), Some(0));
        assert!(table.lookup("Exception").is_none());
    }

    #[test]
    fn destinations_are_collected() {
        let table: ExceptionPolicyTable = [
            ExceptionPolicy::builder(["A"]).to("dead").build().unwrap(),
            ExceptionPolicy::builder(["B"]).build().unwrap(),
            ExceptionPolicy::builder(["C"]).to("audit").build().unwrap(),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.destinations().collect::<Vec<_>>(), ["dead", "audit"]);
        assert!(!table.is_empty());
        assert!(table.get(1).is_some());
        assert!(table.get(3).is_none());
    }
}
