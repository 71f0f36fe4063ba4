//! Matcher trait and implementations for transformer matching.
//!
//! This module defines the [`UnitMatcher`] trait and several implementations for
//! deciding whether a [`TransformRule`](crate::unit::TransformRule) applies to a
//! given code unit.
//!
//! # Available Matchers
//!
//! | Matcher | Description |
//! |---------|-------------|
//! | [`NameMatcher`] | Exact qualified name |
//! | [`PrefixMatcher`] | Qualified name prefix (package or namespace) |
//! | [`ScopeMatcher`] | Defining scope |
//! | [`EventKindMatcher`] | Initial load, redefinition and/or retransformation |
//! | [`PredicateMatcher`] | Arbitrary closure |
//!
//! Multiple matchers on one rule combine with AND semantics.

use std::{collections::HashSet, fmt};

use crate::unit::descriptor::{CodeEventKind, CodeUnitDescriptor, ScopeId};

/// Type alias for closure-based match predicates.
pub type MatchPredicate = dyn Fn(&CodeUnitDescriptor) -> bool + Send + Sync;

/// Trait for implementing unit matchers.
///
/// # Implementing Custom Matchers
///
/// ```rust
/// use classweave::unit::{CodeUnitDescriptor, UnitMatcher};
///
/// struct InnerTypeMatcher;
///
/// impl UnitMatcher for InnerTypeMatcher {
///     fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
///         descriptor.simple_name().contains('$')
///     }
///
///     fn description(&self) -> String {
///         "inner types".to_string()
///     }
/// }
/// ```
pub trait UnitMatcher: Send + Sync {
    /// Checks if this matcher matches the given code unit.
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool;

    /// Returns a concise description of this matcher for logging.
    fn description(&self) -> String;
}

/// Matches one or more exact qualified names.
///
/// Names may be given dotted or slash-separated.
#[derive(Clone, Debug, Default)]
pub struct NameMatcher {
    names: HashSet<String>,
}

impl NameMatcher {
    /// Matches exactly `name`.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self::default().or(name)
    }

    /// Additionally matches `name`.
    #[must_use]
    pub fn or(mut self, name: impl AsRef<str>) -> Self {
        self.names.insert(name.as_ref().replace('/', "."));
        self
    }
}

impl UnitMatcher for NameMatcher {
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        self.names.contains(descriptor.name())
    }

    fn description(&self) -> String {
        let mut names: Vec<_> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        format!("name in [{}]", names.join(", "))
    }
}

/// Matches qualified names starting with a prefix.
///
/// A prefix ending in `.` matches everything below that namespace; without the
/// trailing dot it is a plain string prefix.
#[derive(Clone, Debug)]
pub struct PrefixMatcher {
    prefix: String,
}

impl PrefixMatcher {
    /// Matches names starting with `prefix`.
    #[must_use]
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().replace('/', "."),
        }
    }
}

impl UnitMatcher for PrefixMatcher {
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        descriptor.name().starts_with(&self.prefix)
    }

    fn description(&self) -> String {
        format!("name starts with '{}'", self.prefix)
    }
}

/// Matches units defined in one of a set of scopes.
#[derive(Clone, Debug, Default)]
pub struct ScopeMatcher {
    scopes: HashSet<ScopeId>,
    exclude: bool,
}

impl ScopeMatcher {
    /// Matches units defined in `scope`.
    #[must_use]
    pub fn new(scope: ScopeId) -> Self {
        let mut scopes = HashSet::new();
        scopes.insert(scope);
        Self {
            scopes,
            exclude: false,
        }
    }

    /// Matches units defined anywhere except the host's bootstrap scope.
    #[must_use]
    pub fn non_bootstrap() -> Self {
        Self::new(ScopeId::BOOTSTRAP).inverted()
    }

    /// Additionally matches `scope`.
    #[must_use]
    pub fn or(mut self, scope: ScopeId) -> Self {
        self.scopes.insert(scope);
        self
    }

    /// Flips the matcher to match every scope not in the set.
    #[must_use]
    pub fn inverted(mut self) -> Self {
        self.exclude = !self.exclude;
        self
    }
}

impl UnitMatcher for ScopeMatcher {
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        self.scopes.contains(&descriptor.scope()) != self.exclude
    }

    fn description(&self) -> String {
        let mut scopes: Vec<_> = self.scopes.iter().copied().collect();
        scopes.sort_unstable();
        let scopes: Vec<_> = scopes.iter().map(ToString::to_string).collect();
        let op = if self.exclude { "not in" } else { "in" };
        format!("scope {op} [{}]", scopes.join(", "))
    }
}

/// Matches by [`CodeEventKind`].
#[derive(Clone, Debug)]
pub struct EventKindMatcher {
    kinds: Vec<CodeEventKind>,
}

impl EventKindMatcher {
    /// Matches any of `kinds`.
    #[must_use]
    pub fn new(kinds: &[CodeEventKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
        }
    }

    /// Matches only initial loads.
    #[must_use]
    pub fn initial_only() -> Self {
        Self::new(&[CodeEventKind::InitialLoad])
    }

    /// Matches redefinitions and retransformations.
    #[must_use]
    pub fn reloads_only() -> Self {
        Self::new(&[CodeEventKind::Redefinition, CodeEventKind::Retransformation])
    }
}

impl UnitMatcher for EventKindMatcher {
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        self.kinds.contains(&descriptor.kind())
    }

    fn description(&self) -> String {
        let kinds: Vec<_> = self.kinds.iter().map(ToString::to_string).collect();
        format!("kind in [{}]", kinds.join(", "))
    }
}

/// Matches with a closure.
pub struct PredicateMatcher {
    label: String,
    predicate: Box<MatchPredicate>,
}

impl PredicateMatcher {
    /// Wraps `predicate`; `label` is used in the description.
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&CodeUnitDescriptor) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl UnitMatcher for PredicateMatcher {
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
        (self.predicate)(descriptor)
    }

    fn description(&self) -> String {
        format!("predicate '{}'", self.label)
    }
}

impl fmt::Debug for PredicateMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateMatcher")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
