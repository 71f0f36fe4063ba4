//! The attach controller: session lifecycle and the host callback.

use std::sync::{Arc, OnceLock, RwLock};

use arc_swap::ArcSwapOption;
use strum::{Display, EnumIter, EnumString};

use crate::{
    agent::{
        config::AgentConfig,
        host::{HostRuntime, RedefinitionRequest},
        process::HostProcess,
        session::{AttachSession, LoadedUnit, RetransformReport, SessionInfo},
    },
    capability::{Capability, CapabilityNegotiator, CapabilityRequest, CapabilitySet},
    pipeline::RewriteResult,
    registry::TransformerRegistry,
    unit::{CodeUnitDescriptor, Priority, Transformer},
    Error, Result,
};

/// How a session is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum AttachMode {
    /// Attached before any application code loads. Allowed once per host process.
    Launch,
    /// Attached to a running process; requested reload capabilities must be granted.
    Dynamic,
}

/// Owns a transformer registry and the session it started, if any.
///
/// The registry can be changed at any time; changes take effect at the next
/// attach, because each session runs on the snapshot taken when it started.
/// The active session sits in an atomically swappable slot, so
/// [`on_code_event`](Self::on_code_event) never waits on attach, detach, or
/// registry mutation.
///
/// Every controller belongs to a [`HostProcess`]. Only one session may be
/// active per process and launch-time attach happens once per process, so a
/// second controller in the same process cannot attach while the first holds
/// a session. Dropping a controller detaches its session.
pub struct AttachController {
    registry: RwLock<TransformerRegistry>,
    active: ArcSwapOption<AttachSession>,
    process: Arc<HostProcess>,
}

impl Default for AttachController {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachController {
    /// Creates a controller for the current process with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::in_process(Arc::clone(HostProcess::current()))
    }

    /// Creates a controller bound to `process` with an empty registry.
    #[must_use]
    pub fn in_process(process: Arc<HostProcess>) -> Self {
        Self {
            registry: RwLock::new(TransformerRegistry::new()),
            active: ArcSwapOption::empty(),
            process,
        }
    }

    /// The process this controller attaches to.
    #[must_use]
    pub fn process(&self) -> &Arc<HostProcess> {
        &self.process
    }

    /// The process-wide controller used by the agent entry points.
    pub fn global() -> &'static AttachController {
        static GLOBAL: OnceLock<AttachController> = OnceLock::new();
        GLOBAL.get_or_init(AttachController::new)
    }

    /// Registers a transformer for future sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentity`] if the identity is taken.
    pub fn register(&self, transformer: Arc<dyn Transformer>) -> Result<()> {
        write_lock!(self.registry).register(transformer)
    }

    /// Registers a transformer with an explicit priority for future sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIdentity`] if the identity is taken.
    pub fn register_with_priority(
        &self,
        transformer: Arc<dyn Transformer>,
        priority: Priority,
    ) -> Result<()> {
        write_lock!(self.registry).register_with_priority(transformer, priority)
    }

    /// Removes a transformer from future sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such identity is registered.
    pub fn unregister(&self, id: &str) -> Result<Arc<dyn Transformer>> {
        write_lock!(self.registry).unregister(id)
    }

    /// Identities in the live registry, in chain order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the registry lock is poisoned.
    pub fn registered_ids(&self) -> Result<Vec<String>> {
        Ok(read_lock!(self.registry)
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Attaches with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`attach_with_config`](Self::attach_with_config).
    pub fn attach(
        &self,
        mode: AttachMode,
        host: Arc<dyn HostRuntime>,
        initial_units: Vec<Arc<dyn Transformer>>,
    ) -> Result<Arc<AttachSession>> {
        self.attach_with_config(mode, host, initial_units, AgentConfig::default())
    }

    /// Registers `initial_units`, negotiates capabilities and starts a session.
    ///
    /// The attach is all-or-nothing: on any error the registry and the active
    /// slot are left as they were.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAttached`] if a session is active in this controller's
    ///   process, or for a second [`AttachMode::Launch`] attach in that process
    /// - [`Error::DuplicateIdentity`] if an initial unit clashes with the registry
    /// - [`Error::HostUnsupported`] if a required capability is unavailable
    /// - [`Error::UnsupportedCapability`] in dynamic mode, if a requested
    ///   redefinition or retransformation capability is unavailable
    /// - [`Error::InvalidConfig`] for an invalid `config`
    /// - any error returned by [`HostRuntime::install`]
    pub fn attach_with_config(
        &self,
        mode: AttachMode,
        host: Arc<dyn HostRuntime>,
        initial_units: Vec<Arc<dyn Transformer>>,
        config: AgentConfig,
    ) -> Result<Arc<AttachSession>> {
        config.validate()?;

        let _lifecycle = self.process.lifecycle()?;
        if self.process.is_attached() {
            return Err(Error::AlreadyAttached);
        }
        if mode == AttachMode::Launch && self.process.is_launched() {
            return Err(Error::AlreadyAttached);
        }

        let mut registry = write_lock!(self.registry);
        let mut candidate = registry.clone();
        candidate.register_all(initial_units)?;

        let request = config.capability_request();
        let negotiator = CapabilityNegotiator::new();
        let supported = host.supported_capabilities();
        let granted = negotiator.negotiate(supported, &request)?;
        if mode == AttachMode::Dynamic {
            check_reload_capabilities(&request, granted)?;
        }

        let id = self.process.next_session_id();
        let session = Arc::new(AttachSession::new(
            id,
            mode,
            config,
            Arc::clone(&host),
            negotiator,
            granted,
            candidate.snapshot(),
        ));
        host.install(granted)?;

        *registry = candidate;
        if mode == AttachMode::Launch {
            self.process.mark_launched();
        }
        self.active.store(Some(Arc::clone(&session)));
        self.process.set_active(Some(Arc::clone(&session)));

        log::info!(
            "attached session #{id} ({mode}): granted {granted} of {supported}, {} transformers",
            session.snapshot().len()
        );
        Ok(session)
    }

    /// Ends the active session.
    ///
    /// In-flight callbacks finish on the snapshot they hold; once this returns,
    /// no new event is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn detach(&self) -> Result<SessionInfo> {
        let _lifecycle = self.process.lifecycle()?;
        let session = self.active.swap(None).ok_or(Error::SessionClosed)?;
        self.process.set_active(None);
        session.close();
        session.host().uninstall();

        let info = session.info()?;
        log::info!("detached {info}");
        Ok(info)
    }

    /// Returns `true` while this controller holds an active session.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.active.load().is_some()
    }

    /// The active session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn session(&self) -> Result<Arc<AttachSession>> {
        self.active.load_full().ok_or(Error::SessionClosed)
    }

    /// The host callback: rewrites one code unit with the active session's chain.
    ///
    /// Safe to call concurrently for distinct units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] when no session is active, plus the
    /// errors of [`AttachSession::on_code_event`].
    pub fn on_code_event(
        &self,
        descriptor: &CodeUnitDescriptor,
        buffer: &[u8],
    ) -> Result<RewriteResult> {
        self.session()?.on_code_event(descriptor, buffer)
    }

    /// Re-runs capability negotiation for the active session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyNegotiated`] while a session is active, since
    /// negotiation happens at attach; [`Error::SessionClosed`] otherwise.
    pub fn negotiate(&self, request: &CapabilityRequest) -> Result<CapabilitySet> {
        self.session()?.negotiate(request)
    }

    /// Capabilities granted to the active session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn granted(&self) -> Result<CapabilitySet> {
        Ok(self.session()?.granted())
    }

    /// Asks the host to replace loaded definitions.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if no session is active
    /// - [`Error::UnsupportedCapability`] if redefinition was not granted
    /// - any error from [`HostRuntime::redefine`]
    pub fn redefine(&self, requests: &[RedefinitionRequest]) -> Result<()> {
        let session = self.session()?;
        session.require(Capability::Redefine)?;
        if requests.is_empty() {
            return Ok(());
        }

        log::info!("session #{}: redefining {} units", session.id(), requests.len());
        session.host().redefine(requests)
    }

    /// Asks the host to retransform the named units.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if no session is active
    /// - [`Error::UnsupportedCapability`] if retransformation was not granted
    /// - any error from [`HostRuntime::retransform`]
    pub fn retransform(&self, names: &[String]) -> Result<()> {
        let session = self.session()?;
        session.require(Capability::Retransform)?;
        if names.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = names.iter().map(|n| n.replace('/', ".")).collect();
        log::info!("session #{}: retransforming {} units", session.id(), names.len());
        session.host().retransform(&names)
    }

    /// Re-runs the full chain over tracked units accepted by `filter`, without a
    /// host round trip.
    ///
    /// Each unit is rewritten from the buffer it was last defined from. The
    /// tracked current buffers are updated; installing the results in the host
    /// is up to the caller. Runs on the rayon pool when the session's config
    /// enables parallel retransformation.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if no session is active
    /// - [`Error::UnsupportedCapability`] if retransformation was not granted
    pub fn retransform_loaded<F>(&self, filter: F) -> Result<Vec<RetransformReport>>
    where
        F: Fn(&LoadedUnit) -> bool + Sync,
    {
        let session = self.session()?;
        session.require(Capability::Retransform)?;

        let reports = session.retransform_tracked(filter);
        log::info!(
            "session #{}: retransformed {} tracked units",
            session.id(),
            reports.len()
        );
        Ok(reports)
    }

    /// Stops tracking the loaded units accepted by `filter`.
    ///
    /// Returns how many units were released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn release_loaded<F>(&self, filter: F) -> Result<usize>
    where
        F: Fn(&LoadedUnit) -> bool,
    {
        Ok(self.session()?.release_loaded(filter))
    }

    /// Sets the prefix the host uses to resolve wrapped native methods.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if no session is active
    /// - [`Error::UnsupportedCapability`] if native prefixing was not granted
    /// - [`Error::InvalidConfig`] for an empty prefix
    /// - any error from [`HostRuntime::set_native_method_prefix`]
    pub fn set_native_method_prefix(&self, prefix: &str) -> Result<()> {
        let session = self.session()?;
        session.require(Capability::NativePrefix)?;
        if prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "native method prefix must not be empty".to_string(),
            ));
        }

        session.host().set_native_method_prefix(prefix)?;
        session.set_native_prefix(prefix)
    }

    /// Summary of the active session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn session_info(&self) -> Result<SessionInfo> {
        self.session()?.info()
    }
}

impl Drop for AttachController {
    fn drop(&mut self) {
        if self.is_attached() {
            if let Err(error) = self.detach() {
                log::warn!("detach on drop failed: {error}");
            }
        }
    }
}

impl std::fmt::Debug for AttachController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachController")
            .field("attached", &self.is_attached())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// Fails with the first requested reload capability that was not granted.
fn check_reload_capabilities(request: &CapabilityRequest, granted: CapabilitySet) -> Result<()> {
    let reload = CapabilitySet::REDEFINE | CapabilitySet::RETRANSFORM;
    match (request.wanted() & reload)
        .capabilities()
        .find(|c| !granted.has(*c))
    {
        Some(missing) => {
            log::warn!("dynamic attach refused: '{missing}' requested but not granted");
            Err(Error::UnsupportedCapability(missing))
        }
        None => Ok(()),
    }
}
