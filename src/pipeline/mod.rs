//! Rewrite pipeline: chained, failure-isolated application of transformers.
//!
//! The pipeline takes the input buffer of one code event and the transformers
//! that matched it, and runs them in order. Each transformer sees the output of
//! the previous successful one. A transformer that returns an error, panics, or
//! exceeds the configured time limit is recorded as a [`UnitFailure`] and its
//! output is skipped; the rest of the chain continues with the last good buffer.
//!
//! # Architecture
//!
//! | Type | Role |
//! |------|------|
//! | [`RewritePipeline`] | Runs a chain for one event |
//! | [`RewriteResult`] | `Unchanged`, `Rewritten`, or `Failed` with the surviving buffer |
//! | [`UnitFailure`] / [`FailureCause`] | Which transformer failed and how |
//! | [`Quarantine`] | Transformers skipped after timing out |
//!
//! The pipeline holds no state between calls. Nothing it produces is cached;
//! every code event is rewritten independently. The only state that outlives
//! a call is an optional caller-owned [`Quarantine`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use classweave::{
//!     pipeline::{RewritePipeline, RewriteResult},
//!     unit::{CodeUnitDescriptor, ScopeId, TransformRule, Transformer},
//! };
//!
//! let units: Vec<Arc<dyn Transformer>> = vec![
//!     Arc::new(TransformRule::new("a").rewrite_with(|_, b| Ok(Some([b, &[1]].concat())))),
//!     Arc::new(TransformRule::new("b").rewrite_with(|_, b| Ok(Some([b, &[2]].concat())))),
//! ];
//!
//! let descriptor = CodeUnitDescriptor::initial_load("app.Main", ScopeId(1));
//! let result = RewritePipeline::new().apply(&descriptor, &[0], &units);
//! assert_eq!(result, RewriteResult::Rewritten(vec![0, 1, 2]));
//! ```

mod quarantine;
mod result;
mod runner;

pub use quarantine::Quarantine;
pub use result::{FailureCause, RewriteResult, UnitFailure};

use std::{borrow::Cow, sync::Arc, time::Duration};

use crate::{
    registry::RegistrySnapshot,
    unit::{CodeUnitDescriptor, Transformer},
};

/// Applies matched transformers to a code buffer.
///
/// Cheap to copy and safe to share between host loader threads; all state of
/// one run lives on the calling thread's stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewritePipeline {
    timeout: Option<Duration>,
}

impl RewritePipeline {
    /// Creates a pipeline that runs transformers inline without a time limit.
    #[must_use]
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Creates a pipeline that fails any transformer running longer than `limit`.
    #[must_use]
    pub fn with_timeout(limit: Duration) -> Self {
        Self {
            timeout: Some(limit),
        }
    }

    /// Creates a pipeline from an optional limit.
    #[must_use]
    pub fn from_timeout(limit: Option<Duration>) -> Self {
        Self { timeout: limit }
    }

    /// The per-transformer time limit, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs `units` in the given order over `buffer`.
    ///
    /// Callers pass only the transformers that matched `descriptor`; this
    /// method does not filter.
    pub fn apply<'a, I>(
        &self,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
        units: I,
    ) -> RewriteResult
    where
        I: IntoIterator<Item = &'a Arc<dyn Transformer>>,
    {
        self.run_chain(descriptor, buffer, units, None)
    }

    /// Like [`apply`](Self::apply), but skips units in `quarantine` and adds
    /// every unit that times out to it.
    pub fn apply_quarantined<'a, I>(
        &self,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
        units: I,
        quarantine: &Quarantine,
    ) -> RewriteResult
    where
        I: IntoIterator<Item = &'a Arc<dyn Transformer>>,
    {
        self.run_chain(descriptor, buffer, units, Some(quarantine))
    }

    fn run_chain<'a, I>(
        &self,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
        units: I,
        quarantine: Option<&Quarantine>,
    ) -> RewriteResult
    where
        I: IntoIterator<Item = &'a Arc<dyn Transformer>>,
    {
        let mut current: Cow<'_, [u8]> = Cow::Borrowed(buffer);
        let mut failures = Vec::new();

        for unit in units {
            if let Some(limit) = quarantine.and_then(|q| q.limit(unit.id())) {
                log::trace!("'{}' is quarantined, skipped for {}", unit.id(), descriptor.name());
                failures.push(UnitFailure::new(unit.id(), FailureCause::Timeout(limit)));
                continue;
            }

            let outcome = match self.timeout {
                Some(limit) => runner::run_bounded(unit, descriptor, &current, limit),
                None => runner::run_isolated(unit.as_ref(), descriptor, &current),
            };

            match outcome {
                Ok(Some(output)) if output.as_slice() != current.as_ref() => {
                    log::trace!(
                        "'{}' rewrote {} ({} -> {} bytes)",
                        unit.id(),
                        descriptor.name(),
                        current.len(),
                        output.len()
                    );
                    current = Cow::Owned(output);
                }
                Ok(_) => {}
                Err(cause) => {
                    log::warn!(
                        "transformer '{}' failed on {}: {cause}",
                        unit.id(),
                        descriptor.name()
                    );
                    if let (FailureCause::Timeout(limit), Some(quarantine)) = (&cause, quarantine) {
                        if quarantine.insert(unit.id(), *limit) {
                            log::warn!("transformer '{}' quarantined for this session", unit.id());
                        }
                    }
                    failures.push(UnitFailure::new(unit.id(), cause));
                }
            }
        }

        let output = match current {
            Cow::Owned(output) if output.as_slice() != buffer => Some(output),
            _ => None,
        };

        match (output, failures.is_empty()) {
            (None, true) => RewriteResult::Unchanged,
            (Some(output), true) => RewriteResult::Rewritten(output),
            (buffer, false) => RewriteResult::Failed { failures, buffer },
        }
    }

    /// Runs every transformer in `snapshot` that matches `descriptor`.
    pub fn apply_snapshot(
        &self,
        snapshot: &RegistrySnapshot,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
    ) -> RewriteResult {
        self.apply(descriptor, buffer, snapshot.matching(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;
    use crate::{
        registry::TransformerRegistry,
        test::{append_rule, FailingTransformer, HangingTransformer, PanickingTransformer},
        unit::{ScopeId, TransformRule},
    };

    fn foo() -> CodeUnitDescriptor {
        CodeUnitDescriptor::initial_load("Foo", ScopeId(1))
    }

    #[test]
    fn test_empty_chain_is_unchanged() {
        let units: Vec<Arc<dyn Transformer>> = Vec::new();
        assert_eq!(
            RewritePipeline::new().apply(&foo(), &[0], &units),
            RewriteResult::Unchanged
        );
    }

    #[test]
    fn test_chained_composition() {
        let units = vec![
            append_rule("a", None, 0x01),
            append_rule("b", None, 0x02),
            append_rule("c", None, 0x03),
        ];
        let result = RewritePipeline::new().apply(&foo(), &[0x00], &units);
        assert_eq!(result, RewriteResult::Rewritten(vec![0x00, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn test_order_is_significant() {
        let double: Arc<dyn Transformer> = Arc::new(
            TransformRule::new("double").rewrite_with(|_, b| Ok(Some([b, b].concat()))),
        );
        let mark = append_rule("mark", None, 0x09);

        let pipeline = RewritePipeline::new();
        let first = pipeline.apply(&foo(), &[1], [&double, &mark]);
        let second = pipeline.apply(&foo(), &[1], [&mark, &double]);
        assert_eq!(first, RewriteResult::Rewritten(vec![1, 1, 9]));
        assert_eq!(second, RewriteResult::Rewritten(vec![1, 9, 1, 9]));
    }

    #[test]
    fn test_failing_middle_unit_does_not_stop_tail() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let tail: Arc<dyn Transformer> = Arc::new(TransformRule::new("tail").rewrite_with(
            move |_, buffer| {
                observed.lock().unwrap().push(buffer.to_vec());
                Ok(Some([buffer, &[0x03]].concat()))
            },
        ));
        let units = vec![
            append_rule("head", None, 0x01),
            Arc::new(FailingTransformer::new("middle")) as Arc<dyn Transformer>,
            tail,
        ];

        let result = RewritePipeline::new().apply(&foo(), &[0x00], &units);

        // The tail ran against the head's output, not the failing unit's.
        assert_eq!(*seen.lock().unwrap(), vec![vec![0x00, 0x01]]);
        match result {
            RewriteResult::Failed { failures, buffer } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].unit, "middle");
                assert!(matches!(failures[0].cause, FailureCause::Error(_)));
                assert_eq!(buffer, Some(vec![0x00, 0x01, 0x03]));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_panic_is_isolated() {
        let units = vec![
            Arc::new(PanickingTransformer::new("boom")) as Arc<dyn Transformer>,
            append_rule("after", None, 0x02),
        ];
        let result = RewritePipeline::new().apply(&foo(), &[0x00], &units);

        assert_eq!(result.failures().len(), 1);
        assert!(matches!(result.failures()[0].cause, FailureCause::Panic(_)));
        assert_eq!(result.buffer(), Some(&[0x00, 0x02][..]));
    }

    #[test]
    fn test_all_failures_without_change() {
        let units = vec![
            Arc::new(FailingTransformer::new("x")) as Arc<dyn Transformer>,
            Arc::new(FailingTransformer::new("y")) as Arc<dyn Transformer>,
        ];
        let result = RewritePipeline::new().apply(&foo(), &[0x00], &units);
        match result {
            RewriteResult::Failed { failures, buffer } => {
                let ids: Vec<_> = failures.iter().map(|f| f.unit.as_str()).collect();
                assert_eq!(ids, vec!["x", "y"]);
                assert_eq!(buffer, None);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_output_is_unchanged() {
        let echo: Arc<dyn Transformer> =
            Arc::new(TransformRule::new("echo").rewrite_with(|_, b| Ok(Some(b.to_vec()))));
        let result = RewritePipeline::new().apply(&foo(), &[4, 5], [&echo]);
        assert_eq!(result, RewriteResult::Unchanged);
    }

    #[test]
    fn test_revert_to_input_is_unchanged() {
        let push = append_rule("push", None, 0x07);
        let pop: Arc<dyn Transformer> = Arc::new(TransformRule::new("pop").rewrite_with(|_, b| {
            Ok(Some(b[..b.len() - 1].to_vec()))
        }));
        let result = RewritePipeline::new().apply(&foo(), &[1], [&push, &pop]);
        assert_eq!(result, RewriteResult::Unchanged);
    }

    #[test]
    fn test_timeout_fails_unit_and_continues() {
        let units = vec![
            append_rule("head", None, 0x01),
            Arc::new(HangingTransformer::new("slow", Duration::from_secs(2))) as Arc<dyn Transformer>,
            append_rule("tail", None, 0x02),
        ];
        let limit = Duration::from_millis(25);
        let pipeline = RewritePipeline::with_timeout(limit);
        assert_eq!(pipeline.timeout(), Some(limit));

        let result = pipeline.apply(&foo(), &[0x00], &units);
        assert_eq!(
            result,
            RewriteResult::Failed {
                failures: vec![UnitFailure::new("slow", FailureCause::Timeout(limit))],
                buffer: Some(vec![0x00, 0x01, 0x02]),
            }
        );
    }

    #[test]
    fn test_timed_out_unit_runs_once_when_quarantined() {
        let slow = Arc::new(HangingTransformer::new("slow", Duration::from_millis(400)));
        let units = vec![
            Arc::clone(&slow) as Arc<dyn Transformer>,
            append_rule("tail", None, 0x02),
        ];
        let limit = Duration::from_millis(20);
        let pipeline = RewritePipeline::with_timeout(limit);
        let quarantine = Quarantine::new();

        for _ in 0..4 {
            let result = pipeline.apply_quarantined(&foo(), &[0x00], &units, &quarantine);
            assert_eq!(
                result,
                RewriteResult::Failed {
                    failures: vec![UnitFailure::new("slow", FailureCause::Timeout(limit))],
                    buffer: Some(vec![0x00, 0x02]),
                }
            );
        }

        assert_eq!(slow.calls(), 1);
        assert_eq!(quarantine.ids(), vec!["slow"]);
    }

    #[test]
    fn test_errors_are_not_quarantined() {
        let units = vec![Arc::new(FailingTransformer::new("bad")) as Arc<dyn Transformer>];
        let quarantine = Quarantine::new();
        let pipeline = RewritePipeline::with_timeout(Duration::from_secs(5));
        pipeline.apply_quarantined(&foo(), &[0x00], &units, &quarantine);
        assert!(quarantine.is_empty());
    }

    #[test]
    fn test_apply_snapshot_uses_matching_units_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut registry = TransformerRegistry::new();
        registry.register(append_rule("foo", Some("Foo"), 0x01)).unwrap();
        registry
            .register(Arc::new(TransformRule::new("bar").match_name("Bar").rewrite_with(
                move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                },
            )))
            .unwrap();
        registry.register(append_rule("all", None, 0x02)).unwrap();

        let snapshot = registry.snapshot();
        let result = RewritePipeline::new().apply_snapshot(&snapshot, &foo(), &[0x00]);

        assert_eq!(result, RewriteResult::Rewritten(vec![0x00, 0x01, 0x02]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
