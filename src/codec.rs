//! Structured editing of code buffers through a low-level codec.
//!
//! The pipeline treats code as opaque bytes. Transformers that want to work on
//! a structured form plug a [`Codec`] in through [`CodecTransformer`], which
//! decodes the buffer, hands the view to an edit closure, and re-encodes only
//! if the closure reports a change. An unmodified buffer is therefore passed
//! through untouched, regardless of whether the codec round-trips byte-exactly.
//!
//! ```rust
//! use classweave::{
//!     codec::{CodecTransformer, RawCodec},
//!     unit::{CodeUnitDescriptor, ScopeId, Transformer},
//! };
//!
//! let strip_padding = CodecTransformer::new("strip-padding", RawCodec, |_, view: &mut Vec<u8>| {
//!     let before = view.len();
//!     view.retain(|b| *b != 0);
//!     Ok(view.len() != before)
//! });
//!
//! let d = CodeUnitDescriptor::initial_load("app.Main", ScopeId(1));
//! assert_eq!(strip_padding.rewrite(&d, &[1, 0, 2])?, Some(vec![1, 2]));
//! assert_eq!(strip_padding.rewrite(&d, &[1, 2])?, None);
//! # Ok::<(), classweave::Error>(())
//! ```

use std::fmt;

use crate::{
    unit::{CodeUnitDescriptor, Priority, Transformer, UnitMatcher},
    Result,
};

/// Converts between raw code buffers and a structured view.
///
/// Implementations must round-trip losslessly when the view is not modified.
pub trait Codec: Send + Sync {
    /// The structured representation.
    type View;

    /// Parses a raw buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] if the buffer cannot be parsed.
    fn decode(&self, buffer: &[u8]) -> Result<Self::View>;

    /// Serializes a view back into a raw buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Codec`] if the view cannot be encoded.
    fn encode(&self, view: &Self::View) -> Result<Vec<u8>>;
}

/// The identity codec; the view is the byte buffer itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type View = Vec<u8>;

    fn decode(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        Ok(buffer.to_vec())
    }

    fn encode(&self, view: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(view.clone())
    }
}

/// A transformer that edits the decoded view of a buffer.
///
/// The edit closure returns `Ok(true)` if it modified the view.
pub struct CodecTransformer<C, F> {
    id: String,
    priority: Priority,
    codec: C,
    edit: F,
    matchers: Vec<Box<dyn UnitMatcher>>,
}

impl<C, F> CodecTransformer<C, F>
where
    C: Codec,
    F: Fn(&CodeUnitDescriptor, &mut C::View) -> Result<bool> + Send + Sync,
{
    /// Creates a transformer with default priority that applies to every unit.
    pub fn new(id: impl Into<String>, codec: C, edit: F) -> Self {
        Self {
            id: id.into(),
            priority: Priority::DEFAULT,
            codec,
            edit,
            matchers: Vec::new(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Restricts the transformer to units accepted by `matcher`.
    ///
    /// Multiple matchers combine with AND.
    #[must_use]
    pub fn with_matcher<M: UnitMatcher + 'static>(mut self, matcher: M) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// The codec in use.
    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C, F> Transformer for CodecTransformer<C, F>
where
    C: Codec,
    F: Fn(&CodeUnitDescriptor, &mut C::View) -> Result<bool> + Send + Sync,
{
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
        let mut view = self.codec.decode(buffer)?;
        if !(self.edit)(descriptor, &mut view)? {
            return Ok(None);
        }
        self.codec.encode(&view).map(Some)
    }

    fn description(&self) -> String {
        format!("codec edit '{}'", self.id)
    }
}

impl<C, F> fmt::Debug for CodecTransformer<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecTransformer")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("matchers", &self.matchers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{FailureCause, RewritePipeline, RewriteResult},
        unit::{NameMatcher, ScopeId},
        Error,
    };
    use std::sync::Arc;

    /// Length-prefixed list of u16 words, the smallest codec that can reject input.
    struct WordCodec;

    impl Codec for WordCodec {
        type View = Vec<u16>;

        fn decode(&self, buffer: &[u8]) -> Result<Vec<u16>> {
            let (&count, rest) = buffer
                .split_first()
                .ok_or_else(|| Error::Codec("empty buffer".to_string()))?;
            if rest.len() != usize::from(count) * 2 {
                return Err(Error::Codec(format!(
                    "expected {} words, found {} bytes",
                    count,
                    rest.len()
                )));
            }
            Ok(rest
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect())
        }

        fn encode(&self, view: &Vec<u16>) -> Result<Vec<u8>> {
            let count = u8::try_from(view.len())
                .map_err(|_| Error::Codec("too many words".to_string()))?;
            let mut out = vec![count];
            for word in view {
                out.extend_from_slice(&word.to_le_bytes());
            }
            Ok(out)
        }
    }

    fn descriptor(name: &str) -> CodeUnitDescriptor {
        CodeUnitDescriptor::initial_load(name, ScopeId(3))
    }

    #[test]
    fn test_structured_edit() {
        let t = CodecTransformer::new("bump", WordCodec, |_, words: &mut Vec<u16>| {
            words.iter_mut().for_each(|w| *w += 1);
            Ok(!words.is_empty())
        });

        let out = t.rewrite(&descriptor("A"), &[2, 1, 0, 0xFF, 0]).unwrap();
        assert_eq!(out, Some(vec![2, 2, 0, 0, 1]));
        assert_eq!(t.rewrite(&descriptor("A"), &[0]).unwrap(), None);
    }

    #[test]
    fn test_decode_failure_isolated_by_pipeline() {
        let t: Arc<dyn Transformer> = Arc::new(CodecTransformer::new(
            "words",
            WordCodec,
            |_, _: &mut Vec<u16>| Ok(true),
        ));
        let result = RewritePipeline::new().apply(&descriptor("A"), &[5, 1], [&t]);
        match result {
            RewriteResult::Failed { failures, buffer } => {
                assert_eq!(failures[0].unit, "words");
                assert!(matches!(&failures[0].cause, FailureCause::Error(m) if m.contains("expected 5 words")));
                assert_eq!(buffer, None);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_matchers_and_priority() {
        let t = CodecTransformer::new("raw", RawCodec, |_, _: &mut Vec<u8>| Ok(false))
            .with_priority(Priority::LATE)
            .with_matcher(NameMatcher::new("Foo"));
        assert!(t.matches(&descriptor("Foo")));
        assert!(!t.matches(&descriptor("Bar")));
        assert_eq!(t.priority(), Priority::LATE);
        assert_eq!(t.description(), "codec edit 'raw'");
    }
}
