//! Immutable description of the code unit a host event is about.

use std::{fmt, sync::Arc};

/// Identifier of the scope (loader, module namespace) that defines a code unit.
///
/// The host assigns these; the only value with fixed meaning is
/// [`ScopeId::BOOTSTRAP`], the host's own built-in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// The host's built-in scope.
    pub const BOOTSTRAP: Self = Self(0);

    /// Returns `true` for [`ScopeId::BOOTSTRAP`].
    #[must_use]
    pub fn is_bootstrap(self) -> bool {
        self == Self::BOOTSTRAP
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bootstrap() {
            f.write_str("bootstrap")
        } else {
            write!(f, "scope#{}", self.0)
        }
    }
}

/// Why the host is asking for a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CodeEventKind {
    /// The unit is being defined for the first time.
    InitialLoad,
    /// The unit's definition is being replaced before it ran user logic.
    Redefinition,
    /// The unit is being re-rewritten while it may already be executing.
    Retransformation,
}

impl CodeEventKind {
    /// Returns `true` for events about an already-loaded unit.
    #[must_use]
    pub fn is_reload(self) -> bool {
        !matches!(self, CodeEventKind::InitialLoad)
    }
}

/// Snapshot of the code unit a host event concerns.
///
/// Names are stored in dotted form; slash-separated names (`a/b/C`) are
/// normalised on construction. `current` holds the currently-loaded buffer
/// and is present exactly for [`CodeEventKind::Redefinition`] and
/// [`CodeEventKind::Retransformation`]; the kind-specific constructors keep
/// that invariant.
///
/// Cloning is cheap: name and buffer are reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnitDescriptor {
    name: Arc<str>,
    scope: ScopeId,
    kind: CodeEventKind,
    current: Option<Arc<[u8]>>,
}

impl CodeUnitDescriptor {
    /// Describes a unit being defined for the first time.
    #[must_use]
    pub fn initial_load(name: &str, scope: ScopeId) -> Self {
        Self {
            name: normalize_name(name),
            scope,
            kind: CodeEventKind::InitialLoad,
            current: None,
        }
    }

    /// Describes a redefinition of a loaded unit whose buffer is `current`.
    #[must_use]
    pub fn redefinition(name: &str, scope: ScopeId, current: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: normalize_name(name),
            scope,
            kind: CodeEventKind::Redefinition,
            current: Some(current.into()),
        }
    }

    /// Describes a retransformation of a loaded unit whose buffer is `current`.
    #[must_use]
    pub fn retransformation(name: &str, scope: ScopeId, current: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: normalize_name(name),
            scope,
            kind: CodeEventKind::Retransformation,
            current: Some(current.into()),
        }
    }

    /// Fully qualified, dotted name of the unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the qualified name.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Everything before the last segment, or `""` for unqualified names.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.name.rfind('.').map_or("", |idx| &self.name[..idx])
    }

    /// The defining scope.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Why the event fired.
    #[must_use]
    pub fn kind(&self) -> CodeEventKind {
        self.kind
    }

    /// The currently-loaded buffer, for redefinition and retransformation events.
    #[must_use]
    pub fn current(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }
}

impl fmt::Display for CodeUnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.scope, self.kind)
    }
}

fn normalize_name(name: &str) -> Arc<str> {
    if name.contains('/') {
        Arc::from(name.replace('/', "."))
    } else {
        Arc::from(name)
    }
}
