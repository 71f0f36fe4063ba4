//! Per-session log of rewrite events.
//!
//! Every code event handled by a session appends one [`RewriteEvent`] to the
//! session's [`Diagnostics`]. Events carry the session sequence number, so a
//! host-side trace can be correlated with what the pipeline did. The log is
//! append-only and safe to write from concurrent loader threads through `&self`.
//!
//! A log holds at most its capacity; events past it are counted as dropped and
//! never digested. A capacity of zero turns recording off.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use classweave::{
//!     diagnostics::{Diagnostics, EventOutcome, RewriteEvent},
//!     unit::CodeEventKind,
//! };
//!
//! let log = Diagnostics::new();
//! log.record(RewriteEvent::new(0, "app.Main", CodeEventKind::InitialLoad, &[0])
//!     .finish(EventOutcome::Rewritten, Some(&[0, 1]), Duration::from_micros(12)));
//!
//! assert_eq!(log.len(), 1);
//! assert_eq!(log.summary(), "1 events: 1 rewritten");
//! ```

use std::{
    fmt,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use sha1::{Digest, Sha1};
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    pipeline::{RewriteResult, UnitFailure},
    unit::CodeEventKind,
};

/// SHA-1 digest of a code buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDigest([u8; 20]);

impl BufferDigest {
    /// Computes the digest of `buffer`.
    #[must_use]
    pub fn of(buffer: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(buffer);

        let mut digest = [0u8; 20];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for BufferDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BufferDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferDigest({self})")
    }
}

/// What happened to one code event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EventOutcome {
    /// No transformer changed the buffer.
    Unchanged,
    /// The buffer was rewritten.
    Rewritten,
    /// At least one transformer failed.
    Failed,
    /// A failure was escalated and the event was rejected.
    Escalated,
}

/// A single logged code event.
#[derive(Debug, Clone)]
pub struct RewriteEvent {
    /// Session sequence number.
    pub sequence: u64,
    /// Qualified name of the code unit.
    pub unit_name: String,
    /// Why the host delivered the event.
    pub kind: CodeEventKind,
    /// Result category.
    pub outcome: EventOutcome,
    /// Failures recorded by the pipeline.
    pub failures: Vec<UnitFailure>,
    /// Digest of the input buffer.
    pub input_digest: BufferDigest,
    /// Digest of the produced buffer, if one was produced.
    pub output_digest: Option<BufferDigest>,
    /// Wall-clock time spent in the pipeline.
    pub elapsed: Duration,
}

impl RewriteEvent {
    /// Starts an event for `input`; the outcome defaults to `Unchanged`.
    #[must_use]
    pub fn new(sequence: u64, unit_name: impl Into<String>, kind: CodeEventKind, input: &[u8]) -> Self {
        Self {
            sequence,
            unit_name: unit_name.into(),
            kind,
            outcome: EventOutcome::Unchanged,
            failures: Vec::new(),
            input_digest: BufferDigest::of(input),
            output_digest: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Sets the outcome, output digest and elapsed time.
    #[must_use]
    pub fn finish(mut self, outcome: EventOutcome, output: Option<&[u8]>, elapsed: Duration) -> Self {
        self.outcome = outcome;
        self.output_digest = output.map(BufferDigest::of);
        self.elapsed = elapsed;
        self
    }

    /// Fills in outcome, failures and output digest from a pipeline result.
    #[must_use]
    pub fn with_result(mut self, result: &RewriteResult, elapsed: Duration) -> Self {
        let outcome = match result {
            RewriteResult::Unchanged => EventOutcome::Unchanged,
            RewriteResult::Rewritten(_) => EventOutcome::Rewritten,
            RewriteResult::Failed { .. } => EventOutcome::Failed,
        };
        self.failures = result.failures().to_vec();
        self.finish(outcome, result.buffer(), elapsed)
    }

    /// Marks the event as escalated by the failure policy.
    #[must_use]
    pub fn escalated(mut self) -> Self {
        self.outcome = EventOutcome::Escalated;
        self.output_digest = None;
        self
    }

    /// Returns true if the event recorded failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, EventOutcome::Failed | EventOutcome::Escalated)
    }
}

impl fmt::Display for RewriteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}): {} in {:?}",
            self.sequence, self.unit_name, self.kind, self.outcome, self.elapsed
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

/// Default number of events a session keeps.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Append-only, thread-safe, bounded collection of [`RewriteEvent`]s.
#[derive(Debug)]
pub struct Diagnostics {
    events: boxcar::Vec<RewriteEvent>,
    capacity: usize,
    reserved: AtomicUsize,
    dropped: AtomicU64,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Diagnostics {
    fn clone(&self) -> Self {
        let log = Self::with_capacity(self.capacity);
        for (_, event) in &self.events {
            log.events.push(event.clone());
        }
        log.reserved.store(log.events.count(), Ordering::Relaxed);
        log.dropped
            .store(self.dropped.load(Ordering::Relaxed), Ordering::Relaxed);
        log
    }
}

impl Diagnostics {
    /// Creates a log holding up to [`DEFAULT_CAPACITY`] events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a log holding up to `capacity` events; `0` records nothing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: boxcar::Vec::new(),
            capacity,
            reserved: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends an event. Returns `false` if the log is full.
    pub fn record(&self, event: RewriteEvent) -> bool {
        self.record_with(|| event)
    }

    /// Appends the event built by `make`, calling it only if there is room.
    ///
    /// Returns `false`, without calling `make`, if the log is full.
    pub fn record_with<F>(&self, make: F) -> bool
    where
        F: FnOnce() -> RewriteEvent,
    {
        if self.reserved.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.events.push(make());
        true
    }

    /// Maximum number of events kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `false` if the log was created with capacity zero.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Number of events refused because the log was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Iterates events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RewriteEvent> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Iterates events that recorded failures.
    pub fn failures(&self) -> impl Iterator<Item = &RewriteEvent> + '_ {
        self.iter().filter(|e| e.is_failure())
    }

    /// Iterates events for the code unit `name`.
    pub fn for_unit<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RewriteEvent> + 'a {
        self.iter().filter(move |e| e.unit_name == name)
    }

    /// Counts events with the given outcome.
    #[must_use]
    pub fn count(&self, outcome: EventOutcome) -> usize {
        self.iter().filter(|e| e.outcome == outcome).count()
    }

    /// Total time spent in the pipeline across all events.
    #[must_use]
    pub fn total_elapsed(&self) -> Duration {
        self.iter().map(|e| e.elapsed).sum()
    }

    /// Human-readable summary of outcome counts.
    #[must_use]
    pub fn summary(&self) -> String {
        let dropped = self.dropped();
        if self.is_empty() {
            return match dropped {
                0 => "no events".to_string(),
                n => format!("no events, {n} dropped"),
            };
        }

        let mut parts: Vec<String> = EventOutcome::iter()
            .filter_map(|outcome| match self.count(outcome) {
                0 => None,
                n => Some(format!("{n} {outcome}")),
            })
            .collect();
        if dropped > 0 {
            parts.push(format!("{dropped} dropped"));
        }
        format!("{} events: {}", self.len(), parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;
    use crate::pipeline::FailureCause;

    fn event(seq: u64, name: &str) -> RewriteEvent {
        RewriteEvent::new(seq, name, CodeEventKind::InitialLoad, &[seq as u8])
    }

    #[test]
    fn test_digest_hex() {
        assert_eq!(
            BufferDigest::of(b"abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_summary_and_queries() {
        let log = Diagnostics::new();
        assert_eq!(log.summary(), "no events");

        log.record(event(0, "A").with_result(&RewriteResult::Rewritten(vec![1]), Duration::ZERO));
        log.record(event(1, "B").with_result(&RewriteResult::Unchanged, Duration::ZERO));
        log.record(event(2, "A").with_result(
            &RewriteResult::Failed {
                failures: vec![UnitFailure::new("t", FailureCause::Error("x".into()))],
                buffer: None,
            },
            Duration::ZERO,
        ));
        log.record(event(3, "C").escalated());

        assert_eq!(log.len(), 4);
        assert_eq!(log.for_unit("A").count(), 2);
        assert_eq!(log.failures().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(
            log.summary(),
            "4 events: 1 unchanged, 1 rewritten, 1 failed, 1 escalated"
        );
    }

    #[test]
    fn test_output_digest() {
        let e = event(0, "A").with_result(&RewriteResult::Rewritten(b"abc".to_vec()), Duration::ZERO);
        assert_eq!(e.output_digest, Some(BufferDigest::of(b"abc")));
        assert_eq!(e.input_digest, BufferDigest::of(&[0]));

        let e = event(0, "A").with_result(&RewriteResult::Unchanged, Duration::ZERO);
        assert_eq!(e.output_digest, None);
    }

    #[test]
    fn test_capacity_bounds_log() {
        let log = Diagnostics::with_capacity(3);
        for i in 0..5 {
            log.record(event(i, "A"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.dropped(), 2);
        assert_eq!(log.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(log.summary(), "3 events: 3 unchanged, 2 dropped");
    }

    #[test]
    fn test_disabled_log_builds_nothing() {
        let log = Diagnostics::with_capacity(0);
        assert!(!log.is_enabled());
        let recorded = log.record_with(|| panic!("event built for a disabled log"));
        assert!(!recorded);
        assert!(log.is_empty());
        assert_eq!(log.summary(), "no events, 1 dropped");
    }

    #[test]
    fn test_concurrent_capacity() {
        let log = Diagnostics::with_capacity(100);
        (0..1000u64).into_par_iter().for_each(|i| {
            log.record(event(i, "X"));
        });
        assert_eq!(log.len(), 100);
        assert_eq!(log.dropped(), 900);
    }

    #[test]
    fn test_concurrent_record() {
        let log = Arc::new(Diagnostics::new());
        (0..256u64).into_par_iter().for_each(|i| {
            log.record(event(i, "X"));
        });
        assert_eq!(log.len(), 256);

        let mut seqs: Vec<_> = log.iter().map(|e| e.sequence).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (0..256).collect::<Vec<_>>());
    }
}
