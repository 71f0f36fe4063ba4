//! The [`Transformer`] trait and the [`Priority`] ordering key.

use crate::{unit::descriptor::CodeUnitDescriptor, Result};

/// Ordering key for transformers within a registry.
///
/// Lower values run earlier. Transformers with equal priority run in
/// registration order, so a registry where nobody sets a priority runs
/// strictly in registration order.
///
/// | Constant | Value |
/// |----------|-------|
/// | [`FIRST`](Self::FIRST) | `i32::MIN` |
/// | [`EARLY`](Self::EARLY) | -1000 |
/// | [`DEFAULT`](Self::DEFAULT) | 0 |
/// | [`LATE`](Self::LATE) | 1000 |
/// | [`LAST`](Self::LAST) | `i32::MAX` |
///
/// # Examples
///
/// ```rust
/// use classweave::unit::Priority;
///
/// assert!(Priority::FIRST < Priority::DEFAULT);
/// assert!(Priority(10) < Priority::LATE);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs before everything else.
    pub const FIRST: Self = Self(i32::MIN);

    /// Runs before default-priority transformers.
    pub const EARLY: Self = Self(-1000);

    /// Default for transformers that do not ask for a position.
    pub const DEFAULT: Self = Self(0);

    /// Runs after default-priority transformers.
    pub const LATE: Self = Self(1000);

    /// Runs after everything else.
    pub const LAST: Self = Self(i32::MAX);
}

/// A single rewrite rule applied by the rewrite pipeline.
///
/// Implementations decide which code units they apply to ([`matches`](Self::matches))
/// and how to rewrite a unit's buffer ([`rewrite`](Self::rewrite)). They are shared
/// between host loader threads, so they must be `Send + Sync`; any state they keep
/// must tolerate concurrent calls for different code units.
///
/// # Implementing
///
/// ```rust
/// use classweave::{unit::{CodeUnitDescriptor, Transformer}, Result};
///
/// struct AppendMarker;
///
/// impl Transformer for AppendMarker {
///     fn id(&self) -> &str {
///         "append-marker"
///     }
///
///     fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool {
///         descriptor.namespace().starts_with("com.example")
///     }
///
///     fn rewrite(&self, _descriptor: &CodeUnitDescriptor, buffer: &[u8]) -> Result<Option<Vec<u8>>> {
///         let mut out = buffer.to_vec();
///         out.push(0xFF);
///         Ok(Some(out))
///     }
/// }
/// ```
pub trait Transformer: Send + Sync {
    /// Stable identity, unique within a registry.
    fn id(&self) -> &str;

    /// Position within the registry; see [`Priority`].
    ///
    /// A priority passed explicitly at registration overrides this value.
    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }

    /// Should this transformer see the given code unit?
    fn matches(&self, descriptor: &CodeUnitDescriptor) -> bool;

    /// Rewrites `buffer`.
    ///
    /// `buffer` is the output of the previous transformer in the chain (or the
    /// host's original buffer for the first one). Return `Ok(None)` to leave it
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Any error fails only this transformer for this event; the pipeline
    /// continues with the last good buffer. Panics are treated the same way.
    fn rewrite(&self, descriptor: &CodeUnitDescriptor, buffer: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Get a description of what this transformer does.
    fn description(&self) -> String {
        "No description available".to_string()
    }
}
