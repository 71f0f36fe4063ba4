//! Closure-based transformer definition and builder.
//!
//! This module provides [`TransformRule`], which combines matchers and a rewrite
//! closure into a [`Transformer`] without a dedicated type per rule.

use std::{fmt, sync::Arc};

use crate::{
    unit::{
        descriptor::{CodeEventKind, CodeUnitDescriptor, ScopeId},
        matcher::{
            EventKindMatcher, NameMatcher, PredicateMatcher, PrefixMatcher, ScopeMatcher,
            UnitMatcher,
        },
        transformer::{Priority, Transformer},
    },
    Result,
};

/// Type alias for rewrite closures.
pub type RewriteFn =
    dyn Fn(&CodeUnitDescriptor, &[u8]) -> Result<Option<Vec<u8>>> + Send + Sync;

/// A configurable transformer built from matchers and a rewrite closure.
///
/// # Building Rules
///
/// ```rust
/// use classweave::unit::{Priority, TransformRule};
///
/// let rule = TransformRule::new("append-foo-marker")
///     .with_priority(Priority::EARLY)
///     .match_name("Foo")
///     .rewrite_with(|_descriptor, buffer| {
///         let mut out = buffer.to_vec();
///         out.push(0x01);
///         Ok(Some(out))
///     });
/// ```
///
/// # Matcher Evaluation
///
/// All matchers on a rule must match for the rule to apply (AND semantics).
/// A rule with no matchers applies to every code unit. A rule without a
/// rewrite closure matches but never changes a buffer, which is occasionally
/// handy as a placeholder.
pub struct TransformRule {
    id: String,
    priority: Priority,
    description: Option<String>,
    matchers: Vec<Box<dyn UnitMatcher>>,
    rewrite: Option<Arc<RewriteFn>>,
}

impl TransformRule {
    /// Creates a rule with the given identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::DEFAULT,
            description: None,
            matchers: Vec::new(),
            rewrite: None,
        }
    }

    /// Sets the rule's priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a custom matcher.
    #[must_use]
    pub fn add_matcher<M: UnitMatcher + 'static>(mut self, matcher: M) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Matches exactly the qualified name `name`.
    #[must_use]
    pub fn match_name(self, name: impl AsRef<str>) -> Self {
        self.add_matcher(NameMatcher::new(name))
    }

    /// Matches qualified names starting with `prefix`.
    #[must_use]
    pub fn match_prefix(self, prefix: impl AsRef<str>) -> Self {
        self.add_matcher(PrefixMatcher::new(prefix))
    }

    /// Matches units defined in `scope`.
    #[must_use]
    pub fn match_scope(self, scope: ScopeId) -> Self {
        self.add_matcher(ScopeMatcher::new(scope))
    }

    /// Matches any of `kinds`.
    #[must_use]
    pub fn match_kind(self, kinds: &[CodeEventKind]) -> Self {
        self.add_matcher(EventKindMatcher::new(kinds))
    }

    /// Matches with a closure.
    #[must_use]
    pub fn match_with<F>(self, label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&CodeUnitDescriptor) -> bool + Send + Sync + 'static,
    {
        self.add_matcher(PredicateMatcher::new(label, predicate))
    }

    /// Sets the rewrite closure.
    #[must_use]
    pub fn rewrite_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&CodeUnitDescriptor, &[u8]) -> Result<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        self.rewrite = Some(Arc::new(f));
        self
    }

    /// Returns `true` if a rewrite closure is set.
    #[must_use]
    pub fn has_rewrite(&self) -> bool {
        self.rewrite.is_some()
    }

    /// Number of matchers on this rule.
    #[must_use]
    pub fn matcher_count(&self) -> usize {
        self.matchers.len()
    }
}

impl Transformer for TransformRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        self.matchers.iter().all(|m| m.matches(descriptor))
    }

    fn rewrite(&self, descriptor: &CodeUnitDescriptor, buffer: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.rewrite {
            Some(f) => f(descriptor, buffer),
            None => Ok(None),
        }
    }

    fn description(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        if self.matchers.is_empty() {
            return "all units".to_string();
        }
        self.matchers
            .iter()
            .map(|m| m.description())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

impl fmt::Debug for TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRule")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("matchers", &self.matchers.len())
            .field("has_rewrite", &self.rewrite.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_without_matchers_matches_all() {
        let rule = TransformRule::new("all");
        assert!(rule.matches(&CodeUnitDescriptor::initial_load("X", ScopeId(1))));
        assert_eq!(rule.description(), "all units");
        assert_eq!(
            rule.rewrite(&CodeUnitDescriptor::initial_load("X", ScopeId(1)), &[1])
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_rule_and_semantics() {
        let rule = TransformRule::new("scoped")
            .match_prefix("app.")
            .match_scope(ScopeId(7))
            .match_kind(&[CodeEventKind::InitialLoad]);

        assert!(rule.matches(&CodeUnitDescriptor::initial_load("app.Main", ScopeId(7))));
        assert!(!rule.matches(&CodeUnitDescriptor::initial_load("app.Main", ScopeId(8))));
        assert!(!rule.matches(&CodeUnitDescriptor::initial_load("lib.Main", ScopeId(7))));
        assert!(!rule.matches(&CodeUnitDescriptor::redefinition(
            "app.Main",
            ScopeId(7),
            vec![0u8]
        )));
        assert_eq!(rule.matcher_count(), 3);
        assert_eq!(
            rule.description(),
            "name starts with 'app.' and scope in [scope#7] and kind in [initial_load]"
        );
    }

    #[test]
    fn test_rule_rewrite_closure() {
        let rule = TransformRule::new("double")
            .with_priority(Priority::LATE)
            .with_description("duplicates the buffer")
            .rewrite_with(|_, buf| Ok(Some([buf, buf].concat())));

        let d = CodeUnitDescriptor::initial_load("A", ScopeId(1));
        assert_eq!(rule.rewrite(&d, &[1, 2]).unwrap(), Some(vec![1, 2, 1, 2]));
        assert_eq!(rule.priority(), Priority::LATE);
        assert_eq!(rule.description(), "duplicates the buffer");
        assert!(rule.has_rewrite());
    }
}
