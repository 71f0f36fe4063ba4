//! Registry for managing transformers.
//!
//! The [`TransformerRegistry`] holds the ordered set of transformers an agent
//! applies. Sessions never iterate the live registry; they take a
//! [`RegistrySnapshot`] at attach time, which stays valid and unchanged while the
//! registry keeps being mutated.
//!
//! # Ordering
//!
//! Entries are ordered by ([`Priority`], registration sequence). With default
//! priorities this is plain registration order; an explicit priority moves an
//! entry ahead of (lower value) or behind (higher value) the others.
//!
//! # Copy-on-write
//!
//! The entry list lives behind an `Arc`. Taking a snapshot clones the `Arc`;
//! the next mutation copies the list only if a snapshot still shares it.

use std::{fmt, sync::Arc};

use crate::{
    unit::{CodeUnitDescriptor, Priority, Transformer},
    Error, Result,
};

/// One registered transformer together with its ordering key.
#[derive(Clone)]
pub struct RegistryEntry {
    transformer: Arc<dyn Transformer>,
    priority: Priority,
    sequence: u64,
}

impl RegistryEntry {
    /// The transformer's identity.
    #[must_use]
    pub fn id(&self) -> &str {
        self.transformer.id()
    }

    /// The effective priority (explicit override or the transformer's own).
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Registration sequence number, used to break priority ties.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The registered transformer.
    #[must_use]
    pub fn transformer(&self) -> &Arc<dyn Transformer> {
        &self.transformer
    }

    fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.id())
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Ordered collection of transformers with unique identities.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use classweave::{registry::TransformerRegistry, unit::TransformRule};
///
/// let mut registry = TransformerRegistry::new();
/// registry.register(Arc::new(TransformRule::new("a")))?;
/// registry.register(Arc::new(TransformRule::new("b")))?;
/// assert!(registry.register(Arc::new(TransformRule::new("a"))).is_err());
///
/// let snapshot = registry.snapshot();
/// registry.unregister("a")?;
/// assert_eq!(snapshot.ids(), vec!["a", "b"]);
/// assert_eq!(registry.ids(), vec!["b"]);
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Default, Clone)]
pub struct TransformerRegistry {
    entries: Arc<Vec<RegistryEntry>>,
    next_sequence: u64,
}

impl TransformerRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transformer` at its own [`Transformer::priority`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentity`] if the identity is already registered.
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) -> Result<()> {
        let priority = transformer.priority();
        self.register_with_priority(transformer, priority)
    }

    /// Registers `transformer` at an explicit `priority`, overriding its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentity`] if the identity is already registered.
    pub fn register_with_priority(
        &mut self,
        transformer: Arc<dyn Transformer>,
        priority: Priority,
    ) -> Result<()> {
        if self.contains(transformer.id()) {
            return Err(Error::DuplicateIdentity(transformer.id().to_string()));
        }

        let entry = RegistryEntry {
            transformer,
            priority,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let key = entry.order_key();
        let entries = Arc::make_mut(&mut self.entries);
        let pos = entries.partition_point(|e| e.order_key() < key);
        log::debug!(
            "registered transformer '{}' at priority {} (position {pos})",
            entry.id(),
            priority.0
        );
        entries.insert(pos, entry);
        Ok(())
    }

    /// Registers several transformers, stopping at the first duplicate.
    ///
    /// Transformers registered before the failing one stay registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentity`] for the first duplicate identity.
    pub fn register_all<I>(&mut self, transformers: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Transformer>>,
    {
        for transformer in transformers {
            self.register(transformer)?;
        }
        Ok(())
    }

    /// Removes the transformer with identity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such transformer is registered.
    pub fn unregister(&mut self, id: &str) -> Result<Arc<dyn Transformer>> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id() == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let entry = Arc::make_mut(&mut self.entries).remove(pos);
        log::debug!("unregistered transformer '{id}'");
        Ok(entry.transformer)
    }

    /// Retrieves a transformer by identity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Transformer>> {
        self.entries
            .iter()
            .find(|e| e.id() == id)
            .map(RegistryEntry::transformer)
    }

    /// Checks if a transformer with the given identity is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id() == id)
    }

    /// Returns the identities in iteration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(RegistryEntry::id).collect()
    }

    /// Returns the number of registered transformers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Returns an immutable ordered view of the current registry.
    ///
    /// The snapshot is unaffected by later mutation of this registry.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Immutable, cheaply clonable ordered view of a [`TransformerRegistry`].
///
/// Safe to share between threads and to iterate concurrently without locks.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    entries: Arc<Vec<RegistryEntry>>,
}

impl RegistrySnapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Iterates all entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Iterates, in order, the transformers that match `descriptor`.
    pub fn matching<'a>(
        &'a self,
        descriptor: &'a CodeUnitDescriptor,
    ) -> impl Iterator<Item = &'a Arc<dyn Transformer>> + 'a {
        self.entries
            .iter()
            .map(RegistryEntry::transformer)
            .filter(move |t| t.matches(descriptor))
    }

    /// Returns the identities in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(RegistryEntry::id).collect()
    }

    /// Number of transformers in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if both snapshots share the same entry list.
    #[must_use]
    pub fn ptr_eq(&self, other: &RegistrySnapshot) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("ids", &self.ids())
            .finish()
    }
}
