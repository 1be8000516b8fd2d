use std::collections::BTreeMap;
use std::fmt::Debug;

/// Specific associations name individual exports, shared ones cover a whole role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssociationScope {
    Specific,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule<K> {
    signature: K,
    exports: Vec<String>,
    scope: AssociationScope,
}

/// Root signature to export rules. Resolution applies every specific rule before any
/// shared one, each in insertion order, and the last rule touching an export wins.
#[derive(Debug, Clone)]
pub struct AssociationMap<K> {
    rules: Vec<Rule<K>>,
}

impl<K> Default for AssociationMap<K> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<K: Copy + Debug + PartialEq> AssociationMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn associate(&mut self, signature: K, exports: &[&str], scope: AssociationScope) {
        self.rules.push(Rule {
            signature,
            exports: exports.iter().map(|export| export.to_string()).collect(),
            scope,
        });
    }

    pub fn resolve(&self) -> BTreeMap<String, K> {
        let mut ordered: Vec<_> = self.rules.iter().collect();
        ordered.sort_by_key(|rule| rule.scope);

        let mut resolved = BTreeMap::new();
        for rule in ordered {
            for export in &rule.exports {
                if let Some(previous) = resolved.insert(export.clone(), rule.signature) {
                    if previous != rule.signature {
                        log::debug!(
                            "{export}: {:?} association overrides {previous:?}",
                            rule.scope
                        );
                    }
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Signature {
        Specific,
        Shared,
    }

    #[test]
    fn shared_association_overrides_an_earlier_specific_one() {
        let mut map = AssociationMap::new();
        map.associate(Signature::Specific, &["A"], AssociationScope::Specific);
        map.associate(Signature::Shared, &["A", "B"], AssociationScope::Shared);

        let resolved = map.resolve();
        assert_eq!(resolved["A"], Signature::Shared);
        assert_eq!(resolved["B"], Signature::Shared);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn resolution_does_not_depend_on_call_order() {
        let mut map = AssociationMap::new();
        map.associate(Signature::Shared, &["A", "B"], AssociationScope::Shared);
        map.associate(Signature::Specific, &["A"], AssociationScope::Specific);

        let resolved = map.resolve();
        assert_eq!(resolved["A"], Signature::Shared);
        assert_eq!(resolved["B"], Signature::Shared);
    }

    #[test]
    fn later_rules_of_the_same_scope_win() {
        let mut map = AssociationMap::new();
        map.associate(Signature::Shared, &["A"], AssociationScope::Specific);
        map.associate(Signature::Specific, &["A"], AssociationScope::Specific);
        map.associate(Signature::Specific, &["C"], AssociationScope::Specific);

        let resolved = map.resolve();
        assert_eq!(resolved["A"], Signature::Specific);
        assert_eq!(resolved["C"], Signature::Specific);
    }
}
