//! In-memory policy model.
//!
//! This module defines the seam between the store and the policy engine,
//! and provides an in-memory implementation of it.

use std::collections::BTreeMap;

use tracing::debug;

use super::rule::RuleRow;
use super::section::Section;

/// The policy engine's view of its rule set.
///
/// The store loads rules into a model and reads the model's current rules
/// back during a full save. Decision logic stays with the engine.
pub trait PolicyModel: Send + Sync {
    /// Add a rule to the model.
    ///
    /// # Returns
    ///
    /// `true` if the rule was added, `false` if the model already held it.
    fn add_policy(&mut self, sec: Section, ptype: &str, rule: Vec<String>) -> bool;

    /// Check whether the model holds `rule` under `ptype` in `sec`.
    fn has_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> bool;

    /// All rules in `sec`, grouped by policy type in the model's own order.
    fn policy_sets(&self, sec: Section) -> Vec<(String, Vec<Vec<String>>)>;
}

/// Route a stored row into its section of the model.
///
/// Rows whose tag maps to no section are ignored.
pub fn load_policy_line(row: &RuleRow, model: &mut dyn PolicyModel) {
    match Section::of_ptype(&row.ptype) {
        Some(sec) => {
            model.add_policy(sec, &row.ptype, row.to_tuple());
        }
        None => debug!("Ignoring rule with unknown section: {}", row),
    }
}

/// An in-memory policy model.
///
/// Policy types iterate in lexical order; rules keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryModel {
    /// The rules, indexed by section and policy type.
    sections: BTreeMap<Section, BTreeMap<String, Vec<Vec<String>>>>,
}

impl MemoryModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a rule from the model.
    ///
    /// # Returns
    ///
    /// `true` if the rule was present.
    pub fn remove_policy(&mut self, sec: Section, ptype: &str, rule: &[String]) -> bool {
        let Some(rules) = self
            .sections
            .get_mut(&sec)
            .and_then(|types| types.get_mut(ptype))
        else {
            return false;
        };

        let before = rules.len();
        rules.retain(|r| r.as_slice() != rule);
        rules.len() != before
    }

    /// Get the rules for `ptype` in `sec`.
    pub fn policy(&self, sec: Section, ptype: &str) -> Vec<Vec<String>> {
        self.sections
            .get(&sec)
            .and_then(|types| types.get(ptype))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of rules across all sections.
    pub fn len(&self) -> usize {
        self.sections
            .values()
            .flat_map(|types| types.values())
            .map(Vec::len)
            .sum()
    }

    /// Check whether the model holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every rule.
    pub fn clear_policy(&mut self) {
        self.sections.clear();
    }
}

impl PolicyModel for MemoryModel {
    fn add_policy(&mut self, sec: Section, ptype: &str, rule: Vec<String>) -> bool {
        let rules = self
            .sections
            .entry(sec)
            .or_default()
            .entry(ptype.to_string())
            .or_default();

        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }

    fn has_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> bool {
        self.sections
            .get(&sec)
            .and_then(|types| types.get(ptype))
            .map(|rules| rules.iter().any(|r| r.as_slice() == rule))
            .unwrap_or(false)
    }

    fn policy_sets(&self, sec: Section) -> Vec<(String, Vec<Vec<String>>)> {
        self.sections
            .get(&sec)
            .map(|types| {
                types
                    .iter()
                    .map(|(ptype, rules)| (ptype.clone(), rules.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_add_and_has_policy() {
        let mut model = MemoryModel::new();
        assert!(model.add_policy(Section::Policy, "p", rule(&["alice", "data1", "read"])));
        assert!(!model.add_policy(Section::Policy, "p", rule(&["alice", "data1", "read"])));

        assert!(model.has_policy(Section::Policy, "p", &rule(&["alice", "data1", "read"])));
        assert!(!model.has_policy(Section::Policy, "p", &rule(&["alice", "data1"])));
        assert!(!model.has_policy(Section::Grouping, "p", &rule(&["alice", "data1", "read"])));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn test_remove_policy() {
        let mut model = MemoryModel::new();
        model.add_policy(Section::Policy, "p", rule(&["alice", "data1", "read"]));

        assert!(model.remove_policy(Section::Policy, "p", &rule(&["alice", "data1", "read"])));
        assert!(!model.remove_policy(Section::Policy, "p", &rule(&["alice", "data1", "read"])));
        assert!(!model.remove_policy(Section::Grouping, "g", &rule(&["alice"])));
        assert!(model.is_empty());
    }

    #[test]
    fn test_policy_sets_order() {
        let mut model = MemoryModel::new();
        model.add_policy(Section::Policy, "p2", rule(&["x"]));
        model.add_policy(Section::Policy, "p", rule(&["b"]));
        model.add_policy(Section::Policy, "p", rule(&["a"]));

        let sets = model.policy_sets(Section::Policy);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].0, "p");
        assert_eq!(sets[0].1, vec![rule(&["b"]), rule(&["a"])]);
        assert_eq!(sets[1].0, "p2");
        assert!(model.policy_sets(Section::Grouping).is_empty());
    }

    #[test]
    fn test_load_policy_line() {
        let mut model = MemoryModel::new();
        let g = RuleRow::from_tuple("g", &["alice", "data2_admin"]).unwrap();
        let unknown = RuleRow::from_tuple("e", &["x"]).unwrap();

        load_policy_line(&g, &mut model);
        load_policy_line(&unknown, &mut model);

        assert!(model.has_policy(Section::Grouping, "g", &rule(&["alice", "data2_admin"])));
        assert_eq!(model.len(), 1);
    }
}
