//! The validated, immutable list of rules for one run.

use super::RuleSpec;
use crate::error::{GuardError, Result};
use crate::validators::ValidatorRegistry;
use std::collections::HashSet;
use std::ops::Index;

/// An ordered set of rules that passed run-level validation.
///
/// Construction checks every rule against the registry and rejects the whole
/// set when a validator type is unknown or two rules share a name. Rules
/// without a name get one derived from their type and table; derived names
/// never collide with each other or with explicit names.
///
/// Declaration order is preserved and is the order of the final report.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<RuleSpec>,
}

impl RuleSet {
    /// Validates `rules` against `registry` and assigns missing names.
    pub fn new(rules: Vec<RuleSpec>, registry: &ValidatorRegistry) -> Result<Self> {
        let mut seen: HashSet<String> = HashSet::with_capacity(rules.len());

        for rule in &rules {
            if rule.rule_type.trim().is_empty() {
                return Err(GuardError::configuration(format!(
                    "rule '{}' has no type",
                    rule.name()
                )));
            }
            if !registry.contains(&rule.rule_type) {
                return Err(GuardError::configuration(format!(
                    "rule '{}' has unknown type '{}' (known types: {})",
                    rule.name(),
                    rule.rule_type,
                    registry.types().join(", ")
                )));
            }
            if let Some(name) = &rule.name {
                if name.trim().is_empty() {
                    return Err(GuardError::configuration(
                        "rule names must not be empty".to_string(),
                    ));
                }
                if !seen.insert(name.clone()) {
                    return Err(GuardError::configuration(format!(
                        "duplicate rule name '{name}'"
                    )));
                }
            }
        }

        let rules = rules
            .into_iter()
            .map(|mut rule| {
                if rule.name.is_none() {
                    let base = match rule.table.as_deref() {
                        Some(table) if !table.is_empty() => format!("{}_{table}", rule.rule_type),
                        _ => rule.rule_type.clone(),
                    };
                    let mut candidate = base.clone();
                    let mut suffix = 2;
                    while seen.contains(&candidate) {
                        candidate = format!("{base}_{suffix}");
                        suffix += 1;
                    }
                    seen.insert(candidate.clone());
                    rule.name = Some(candidate);
                }
                rule
            })
            .collect();

        Ok(Self { rules })
    }

    /// Number of declared rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true when no rules were declared.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates rules in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, RuleSpec> {
        self.rules.iter()
    }

    /// The rules in declaration order.
    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }

    /// Returns the rule at a declaration index.
    pub fn get(&self, index: usize) -> Option<&RuleSpec> {
        self.rules.get(index)
    }

    /// Finds a rule by name.
    pub fn find(&self, name: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|rule| rule.name() == name)
    }
}

impl Index<usize> for RuleSet {
    type Output = RuleSpec;

    fn index(&self, index: usize) -> &Self::Output {
        &self.rules[index]
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a RuleSpec;
    type IntoIter = std::slice::Iter<'a, RuleSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::builtin()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let rules = vec![
            RuleSpec::new("check", "completeness", Severity::Low).on_table("a"),
            RuleSpec::new("check", "range", Severity::High).on_table("b"),
        ];
        let err = RuleSet::new(rules, &registry()).unwrap_err();
        assert!(err.is_fatal_configuration());
        assert!(err.to_string().contains("duplicate rule name 'check'"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let rules = vec![RuleSpec::new("r", "freshness", Severity::Low)];
        let err = RuleSet::new(rules, &registry()).unwrap_err();
        assert!(err.is_fatal_configuration());
        assert!(err.to_string().contains("unknown type 'freshness'"));
    }

    #[test]
    fn test_derived_names_are_unique() {
        let rules = vec![
            RuleSpec::unnamed("completeness", Severity::Low).on_table("orders"),
            RuleSpec::new("completeness_orders_2", "range", Severity::Low).on_table("orders"),
            RuleSpec::unnamed("completeness", Severity::Low).on_table("orders"),
            RuleSpec::unnamed("custom_sql", Severity::Low),
        ];
        let set = RuleSet::new(rules, &registry()).unwrap();
        let names: Vec<&str> = set.iter().map(RuleSpec::name).collect();
        assert_eq!(
            names,
            vec![
                "completeness_orders",
                "completeness_orders_2",
                "completeness_orders_3",
                "custom_sql"
            ]
        );
    }

    #[test]
    fn test_order_preserved() {
        let rules: Vec<RuleSpec> = (0..5)
            .map(|i| RuleSpec::new(format!("rule_{i}"), "custom_sql", Severity::Medium))
            .collect();
        let set = RuleSet::new(rules, &registry()).unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(set[3].name(), "rule_3");
        assert!(set.find("rule_4").is_some());
    }
}
