//! Request matching logic.
//!
//! Holds the ordered rule list and selects the first rule whose pattern
//! matches the request path and whose method list admits the request method.

use crate::config::RuleDefinition;
use crate::error::RuleError;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

/// A rule with its pattern compiled.
#[derive(Debug)]
pub struct CompiledRule {
    definition: RuleDefinition,
    regex: Regex,
}

impl CompiledRule {
    /// Compile a rule definition.
    pub fn compile(definition: RuleDefinition) -> Result<Self, RuleError> {
        let regex = Regex::new(&definition.pattern).map_err(|source| RuleError::Pattern {
            pattern: definition.pattern.clone(),
            source,
        })?;
        definition.validate()?;
        Ok(Self { definition, regex })
    }

    /// The rule as configured.
    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    fn matches(&self, path: &str, method: &str) -> bool {
        self.regex.is_match(path) && self.definition.allows_method(method)
    }

    fn has_name(&self, name: &str) -> bool {
        self.definition.name.as_deref() == Some(name)
    }
}

/// Ordered rule store.
///
/// Matching is first-hit in insertion order. Readers share the lock; add,
/// replace, delete and clear take it exclusively, so a reader sees the list
/// either before or after a mutation. Matched rules are handed out as `Arc`s
/// and no lock is held once `find` returns.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: RwLock<Vec<Arc<CompiledRule>>>,
}

impl RuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a rule.
    ///
    /// The store is left untouched when the pattern does not compile, a status
    /// code is invalid, or the name is already taken.
    pub fn add(&self, definition: RuleDefinition) -> Result<(), RuleError> {
        let compiled = CompiledRule::compile(definition)?;

        let mut rules = self.rules.write();
        if let Some(name) = compiled.definition.name.as_deref() {
            if rules.iter().any(|r| r.has_name(name)) {
                return Err(RuleError::DuplicateName(name.to_string()));
            }
        }
        info!(
            rule = %compiled.definition.label(),
            pattern = %compiled.definition.pattern,
            "Rule added"
        );
        rules.push(Arc::new(compiled));
        Ok(())
    }

    /// Find the first rule matching `path` and `method`.
    pub fn find(&self, path: &str, method: &str) -> Option<Arc<CompiledRule>> {
        let rules = self.rules.read();
        rules.iter().find(|r| r.matches(path, method)).cloned()
    }

    /// Replace the rule named `name`, keeping its position.
    pub fn replace(&self, name: &str, definition: RuleDefinition) -> Result<(), RuleError> {
        let compiled = CompiledRule::compile(definition)?;

        let mut rules = self.rules.write();
        let Some(index) = rules.iter().position(|r| r.has_name(name)) else {
            warn!(rule = %name, "Rule not found for update");
            return Err(RuleError::NotFound(name.to_string()));
        };
        if let Some(new_name) = compiled.definition.name.as_deref() {
            let taken = rules
                .iter()
                .enumerate()
                .any(|(i, r)| i != index && r.has_name(new_name));
            if taken {
                return Err(RuleError::DuplicateName(new_name.to_string()));
            }
        }
        rules[index] = Arc::new(compiled);
        info!(rule = %name, "Rule replaced");
        Ok(())
    }

    /// Remove the first rule named `name`. Returns whether one was removed.
    pub fn delete(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        match rules.iter().position(|r| r.has_name(name)) {
            Some(index) => {
                rules.remove(index);
                info!(rule = %name, "Rule deleted");
                true
            }
            None => {
                warn!(rule = %name, "Rule not found for delete");
                false
            }
        }
    }

    /// Remove all rules.
    pub fn clear(&self) {
        self.rules.write().clear();
        info!("All rules cleared");
    }

    /// Copy of every rule definition, in match order.
    pub fn all(&self) -> Vec<RuleDefinition> {
        self.rules
            .read()
            .iter()
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Copy of the rule named `name`.
    pub fn get(&self, name: &str) -> Option<RuleDefinition> {
        self.rules
            .read()
            .iter()
            .find(|r| r.has_name(name))
            .map(|r| r.definition.clone())
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether the store holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
