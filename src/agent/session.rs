//! The live state of one attach session.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Instant,
};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    agent::{
        config::{AgentConfig, FailurePolicy},
        controller::AttachMode,
        host::HostRuntime,
    },
    capability::{Capability, CapabilityNegotiator, CapabilityRequest, CapabilitySet},
    diagnostics::{Diagnostics, RewriteEvent},
    pipeline::{Quarantine, RewritePipeline, RewriteResult},
    registry::RegistrySnapshot,
    unit::{CodeEventKind, CodeUnitDescriptor, ScopeId},
    Error, Result,
};

/// A code unit the session has seen, with the buffers needed to rewrite it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedUnit {
    /// Qualified name.
    pub name: String,
    /// Defining scope.
    pub scope: ScopeId,
    /// The buffer the host last defined the unit from, before any rewriting.
    pub original: Arc<[u8]>,
    /// The buffer the host is running now; shares `original` when nothing
    /// rewrote it.
    pub current: Arc<[u8]>,
}

/// Outcome of re-running the chain over one tracked unit.
#[derive(Debug)]
pub struct RetransformReport {
    /// Qualified name.
    pub name: String,
    /// Defining scope.
    pub scope: ScopeId,
    /// The pipeline result, or the escalated failure under the fatal policy.
    pub result: Result<RewriteResult>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session number, unique per host process.
    pub id: u64,
    /// How the session was attached.
    pub mode: AttachMode,
    /// Capabilities granted at attach.
    pub granted: CapabilitySet,
    /// Number of transformers in the session snapshot.
    pub transformers: usize,
    /// Number of code events handled so far.
    pub events: u64,
    /// Number of tracked loaded units.
    pub loaded_units: usize,
    /// Number of transformers withdrawn after timing out.
    pub quarantined: usize,
    /// Number of events the diagnostics log refused.
    pub dropped_events: u64,
    /// Native method prefix, if one was set.
    pub native_prefix: Option<String>,
    /// Whether the session was detached.
    pub closed: bool,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session #{} ({}, {}): {} transformers, {} events, {} loaded units",
            self.id, self.mode, self.granted, self.transformers, self.events, self.loaded_units
        )?;
        if self.quarantined > 0 {
            write!(f, ", {} quarantined", self.quarantined)?;
        }
        if self.closed {
            f.write_str(", closed")?;
        }
        Ok(())
    }
}

/// One attach session.
///
/// A session owns the registry snapshot taken at attach, the negotiated
/// capabilities and a sequence counter. It is shared as `Arc<AttachSession>`
/// between the controller and every in-flight callback; detaching marks it
/// closed, after which it rejects new events while in-flight ones finish
/// against the same snapshot.
pub struct AttachSession {
    id: u64,
    mode: AttachMode,
    config: AgentConfig,
    host: Arc<dyn HostRuntime>,
    negotiator: CapabilityNegotiator,
    granted: CapabilitySet,
    snapshot: RegistrySnapshot,
    pipeline: RewritePipeline,
    sequence: AtomicU64,
    closed: AtomicBool,
    loaded: DashMap<(ScopeId, String), LoadedUnit>,
    quarantine: Quarantine,
    diagnostics: Diagnostics,
    native_prefix: RwLock<Option<String>>,
    started: Instant,
}

impl AttachSession {
    pub(crate) fn new(
        id: u64,
        mode: AttachMode,
        config: AgentConfig,
        host: Arc<dyn HostRuntime>,
        negotiator: CapabilityNegotiator,
        granted: CapabilitySet,
        snapshot: RegistrySnapshot,
    ) -> Self {
        Self {
            id,
            mode,
            pipeline: RewritePipeline::from_timeout(config.rewrite_timeout),
            diagnostics: Diagnostics::with_capacity(config.diagnostics_capacity),
            config,
            host,
            negotiator,
            granted,
            snapshot,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            loaded: DashMap::new(),
            quarantine: Quarantine::new(),
            native_prefix: RwLock::new(None),
            started: Instant::now(),
        }
    }

    /// Session number, unique per host process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// How the session was attached.
    #[must_use]
    pub fn mode(&self) -> AttachMode {
        self.mode
    }

    /// The configuration the session was attached with.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Capabilities granted at attach.
    #[must_use]
    pub fn granted(&self) -> CapabilitySet {
        self.granted
    }

    /// The transformer chain this session runs.
    #[must_use]
    pub fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    /// The session's event log.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Number of code events handled so far.
    #[must_use]
    pub fn events_handled(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Time since attach.
    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Returns `true` once the session has been detached.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the tracked state of a loaded unit.
    #[must_use]
    pub fn loaded_unit(&self, name: &str, scope: ScopeId) -> Option<LoadedUnit> {
        self.loaded
            .get(&(scope, name.replace('/', ".")))
            .map(|entry| entry.value().clone())
    }

    /// Number of tracked loaded units.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Stops tracking the units accepted by `filter` and returns how many were
    /// released. Released units are no longer retransformed by
    /// `retransform_loaded` until the host loads them again.
    pub fn release_loaded<F>(&self, filter: F) -> usize
    where
        F: Fn(&LoadedUnit) -> bool,
    {
        let mut released = 0;
        self.loaded.retain(|_, unit| {
            let keep = !filter(unit);
            if !keep {
                released += 1;
            }
            keep
        });
        released
    }

    /// Transformers withdrawn from this session after timing out, sorted.
    #[must_use]
    pub fn quarantined(&self) -> Vec<String> {
        self.quarantine.ids()
    }

    /// The native method prefix set for this session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the prefix lock is poisoned.
    pub fn native_method_prefix(&self) -> Result<Option<String>> {
        Ok(read_lock!(self.native_prefix).clone())
    }

    /// Attempts to negotiate again.
    ///
    /// Negotiation happens once, at attach, so this always fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyNegotiated`].
    pub fn negotiate(&self, request: &CapabilityRequest) -> Result<CapabilitySet> {
        self.negotiator
            .negotiate(self.host.supported_capabilities(), request)
    }

    /// Checks that `capability` was granted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCapability`] if it was not.
    pub fn require(&self, capability: Capability) -> Result<()> {
        self.negotiator.require(capability)
    }

    /// Rewrites one code unit with this session's chain.
    ///
    /// This is the host callback. It takes no locks on the rewrite path and
    /// may be called concurrently for different units.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] after detach
    /// - [`Error::UnsupportedCapability`] for a reload event whose capability
    ///   was not granted
    /// - [`Error::RewriteFailed`] or [`Error::Timeout`] for the first failure
    ///   when the failure policy is [`FailurePolicy::Fatal`]
    pub fn on_code_event(
        &self,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
    ) -> Result<RewriteResult> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let needed = match descriptor.kind() {
            CodeEventKind::InitialLoad => None,
            CodeEventKind::Redefinition => Some(Capability::Redefine),
            CodeEventKind::Retransformation => Some(Capability::Retransform),
        };
        if let Some(capability) = needed.filter(|c| !self.granted.has(*c)) {
            return Err(Error::UnsupportedCapability(capability));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let event = || RewriteEvent::new(sequence, descriptor.name(), descriptor.kind(), buffer);

        let started = Instant::now();
        let result = self.pipeline.apply_quarantined(
            descriptor,
            buffer,
            self.snapshot.matching(descriptor),
            &self.quarantine,
        );
        let elapsed = started.elapsed();

        if self.config.failure_policy == FailurePolicy::Fatal {
            if let Some(first) = result.failures().first() {
                log::warn!(
                    "#{sequence} {}: escalating failure of '{}' ({})",
                    descriptor.name(),
                    first.unit,
                    first.cause
                );
                let error = first.clone().into_error();
                self.diagnostics
                    .record_with(|| event().with_result(&result, elapsed).escalated());
                self.track(descriptor, buffer, None);
                return Err(error);
            }
        }

        log::trace!(
            "#{sequence} {}: changed={} in {elapsed:?}",
            descriptor.name(),
            result.is_changed()
        );
        self.diagnostics
            .record_with(|| event().with_result(&result, elapsed));
        self.track(descriptor, buffer, result.buffer());
        Ok(result)
    }

    /// Re-runs the chain over tracked units accepted by `filter`.
    ///
    /// Each unit is rewritten from its original buffer as a retransformation
    /// event. Reports are sorted by name, then scope.
    pub(crate) fn retransform_tracked<F>(&self, filter: F) -> Vec<RetransformReport>
    where
        F: Fn(&LoadedUnit) -> bool + Sync,
    {
        // Collected first: re-running writes to the same table.
        let mut targets: Vec<LoadedUnit> = self
            .loaded
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name).then(a.scope.cmp(&b.scope)));

        let rerun = |unit: &LoadedUnit| {
            let descriptor = CodeUnitDescriptor::retransformation(
                &unit.name,
                unit.scope,
                Arc::clone(&unit.current),
            );
            RetransformReport {
                name: unit.name.clone(),
                scope: unit.scope,
                result: self.on_code_event(&descriptor, &unit.original),
            }
        };

        if self.config.parallel_retransform {
            targets.par_iter().map(rerun).collect()
        } else {
            targets.iter().map(rerun).collect()
        }
    }

    /// The host runtime this session is attached to.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    pub(crate) fn set_native_prefix(&self, prefix: &str) -> Result<()> {
        *write_lock!(self.native_prefix) = Some(prefix.to_string());
        Ok(())
    }

    /// Marks the session closed. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Summary of the session's current state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the prefix lock is poisoned.
    pub fn info(&self) -> Result<SessionInfo> {
        Ok(SessionInfo {
            id: self.id,
            mode: self.mode,
            granted: self.granted,
            transformers: self.snapshot.len(),
            events: self.events_handled(),
            loaded_units: self.loaded.len(),
            quarantined: self.quarantine.len(),
            dropped_events: self.diagnostics.dropped(),
            native_prefix: self.native_method_prefix()?,
            closed: self.is_closed(),
        })
    }

    fn track(&self, descriptor: &CodeUnitDescriptor, input: &[u8], output: Option<&[u8]>) {
        if !self.config.track_loaded_units {
            return;
        }

        let key = (descriptor.scope(), descriptor.name().to_string());
        match descriptor.kind() {
            CodeEventKind::Retransformation => {
                self.loaded
                    .entry(key)
                    .and_modify(|unit| {
                        unit.current = output.map_or_else(|| Arc::clone(&unit.original), Arc::from);
                    })
                    .or_insert_with(|| loaded_unit(descriptor, input, output));
            }
            CodeEventKind::InitialLoad | CodeEventKind::Redefinition => {
                self.loaded.insert(key, loaded_unit(descriptor, input, output));
            }
        }
    }
}

fn loaded_unit(descriptor: &CodeUnitDescriptor, input: &[u8], output: Option<&[u8]>) -> LoadedUnit {
    let original: Arc<[u8]> = Arc::from(input);
    LoadedUnit {
        name: descriptor.name().to_string(),
        scope: descriptor.scope(),
        current: output.map_or_else(|| Arc::clone(&original), Arc::from),
        original,
    }
}

impl fmt::Debug for AttachSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("granted", &self.granted)
            .field("snapshot", &self.snapshot)
            .field("events", &self.events_handled())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
