//! Transformers withdrawn from a chain after exceeding the time bound.

use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};

/// Identities of transformers that timed out, with the limit they exceeded.
///
/// A timed-out transformer leaves its helper thread behind. Running it again on
/// later events would leave one more thread each time, so a pipeline given a
/// quarantine skips quarantined units and reports them as
/// [`FailureCause::Timeout`](super::FailureCause::Timeout) without running them.
///
/// One quarantine lives as long as one attach session; the next session starts
/// with every unit eligible again.
#[derive(Debug, Default)]
pub struct Quarantine {
    units: DashMap<String, Duration>,
}

impl Quarantine {
    /// Creates an empty quarantine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The limit `id` exceeded, if it is quarantined.
    #[must_use]
    pub fn limit(&self, id: &str) -> Option<Duration> {
        self.units.get(id).map(|entry| *entry.value())
    }

    /// Returns `true` if `id` is quarantined.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Quarantines `id`. Returns `false` if it already was, keeping the first limit.
    pub fn insert(&self, id: &str, limit: Duration) -> bool {
        match self.units.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(limit);
                true
            }
        }
    }

    /// Number of quarantined transformers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if nothing is quarantined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Quarantined identities, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.units.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}
