//! Attach state shared by every controller in one host process.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, OnceLock,
};

use arc_swap::ArcSwapOption;

use crate::{agent::session::AttachSession, Error, Result};

/// The attach state of one host process.
///
/// A host process runs at most one attach session at a time and accepts a
/// launch-time attach only once in its lifetime, no matter how many
/// [`AttachController`](super::AttachController)s exist. Controllers created
/// with [`AttachController::new`](super::AttachController::new) or obtained
/// from [`AttachController::global`](super::AttachController::global) share
/// [`HostProcess::current`].
///
/// Embedders that drive several isolated runtimes from one OS process give
/// each runtime its own `HostProcess` through
/// [`AttachController::in_process`](super::AttachController::in_process).
pub struct HostProcess {
    lifecycle: Mutex<()>,
    launched: AtomicBool,
    active: ArcSwapOption<AttachSession>,
    sessions: AtomicU64,
    self_attach: Mutex<()>,
}

impl Default for HostProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProcess {
    /// Creates the state of a process nothing has attached to yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(()),
            launched: AtomicBool::new(false),
            active: ArcSwapOption::empty(),
            sessions: AtomicU64::new(0),
            self_attach: Mutex::new(()),
        }
    }

    /// The state of the current OS process.
    pub fn current() -> &'static Arc<HostProcess> {
        static CURRENT: OnceLock<Arc<HostProcess>> = OnceLock::new();
        CURRENT.get_or_init(|| Arc::new(HostProcess::new()))
    }

    /// Returns `true` once a launch-time attach has succeeded in this process.
    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// Returns `true` while any controller holds a session in this process.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.active.load().is_some()
    }

    /// The session active in this process, whichever controller started it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if no session is active.
    pub fn session(&self) -> Result<Arc<AttachSession>> {
        self.active.load_full().ok_or(Error::SessionClosed)
    }

    /// Number of sessions started in this process so far.
    #[must_use]
    pub fn sessions_started(&self) -> u64 {
        self.sessions.load(Ordering::Acquire)
    }

    /// Serializes attach and detach across controllers.
    pub(crate) fn lifecycle(&self) -> Result<MutexGuard<'_, ()>> {
        Ok(lock!(self.lifecycle))
    }

    /// Serializes self-attach requests.
    pub(crate) fn self_attach_lock(&self) -> Result<MutexGuard<'_, ()>> {
        Ok(lock!(self.self_attach))
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mark_launched(&self) {
        self.launched.store(true, Ordering::Release);
    }

    pub(crate) fn set_active(&self, session: Option<Arc<AttachSession>>) {
        self.active.store(session);
    }
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess")
            .field("launched", &self.is_launched())
            .field("attached", &self.is_attached())
            .field("sessions", &self.sessions_started())
            .finish_non_exhaustive()
    }
}
