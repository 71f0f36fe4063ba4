//! Transform units: what a rewrite rule applies to and how it rewrites.
//!
//! A transform unit is anything implementing [`Transformer`]. The registry
//! stores transformers polymorphically as `Arc<dyn Transformer>`, so a unit can
//! be a hand-written type, a closure-based [`TransformRule`], or a
//! [`CodecTransformer`](crate::codec::CodecTransformer) working on a decoded view.
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | `descriptor` | [`CodeUnitDescriptor`], [`CodeEventKind`], [`ScopeId`] |
//! | `transformer` | The [`Transformer`] trait and [`Priority`] |
//! | `matcher` | [`UnitMatcher`] and built-in matchers |
//! | `rule` | The [`TransformRule`] builder |

mod descriptor;
mod matcher;
mod rule;
mod transformer;

pub use descriptor::{CodeEventKind, CodeUnitDescriptor, ScopeId};
pub use matcher::{
    EventKindMatcher, MatchPredicate, NameMatcher, PredicateMatcher, PrefixMatcher, ScopeMatcher,
    UnitMatcher,
};
pub use rule::{RewriteFn, TransformRule};
pub use transformer::{Priority, Transformer};
