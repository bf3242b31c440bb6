//! Maps rule kinds to their constructors.

use crate::error::{PolicyError, PolicyResult};
use crate::rules::{CharsetRule, Rule, CHARSET_RULE_KIND};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a rule from the attributes of its policy block.
pub type RuleConstructor = fn(&Map<String, Value>) -> PolicyResult<Arc<dyn Rule>>;

/// Registry of known rule kinds.
#[derive(Debug, Clone)]
pub struct Registry {
    constructors: HashMap<String, RuleConstructor>,
}

impl Registry {
    /// Create a registry with no rule kinds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor for `kind`, replacing any existing one.
    pub fn register(&mut self, kind: impl Into<String>, constructor: RuleConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    /// Build a rule of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownRule`] for unregistered kinds, or the
    /// constructor's error for malformed data.
    pub fn parse_rule(&self, kind: &str, data: &Map<String, Value>) -> PolicyResult<Arc<dyn Rule>> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| PolicyError::UnknownRule(kind.to_string()))?;
        constructor(data)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for Registry {
    /// The default registry knows the `charset` rule.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CHARSET_RULE_KIND, |data| {
            Ok(Arc::new(CharsetRule::from_map(data)?) as Arc<dyn Rule>)
        });
        registry
    }
}
