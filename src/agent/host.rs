//! The interface the attach controller uses to talk to the host runtime.

use std::{fmt, sync::Arc};

use crate::{capability::CapabilitySet, unit::ScopeId, Error, Result};

/// A request to replace the definition of a loaded code unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedefinitionRequest {
    /// Qualified name of the unit.
    pub name: String,
    /// Scope that defined the unit.
    pub scope: ScopeId,
    /// The replacement buffer.
    pub buffer: Arc<[u8]>,
}

impl RedefinitionRequest {
    /// Creates a request; slash-separated names are normalised to dotted form.
    #[must_use]
    pub fn new(name: &str, scope: ScopeId, buffer: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.replace('/', "."),
            scope,
            buffer: buffer.into(),
        }
    }
}

impl fmt::Display for RedefinitionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.name, self.scope, self.buffer.len())
    }
}

/// A handle on a running process, opened through the host's attach interface.
pub trait ProcessHandle: Send {
    /// Process the handle is attached to.
    fn process_id(&self) -> u32;

    /// Loads `agent` into the process; `args` is the agent argument string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Host`] if the process refuses the agent.
    fn load_agent(&mut self, agent: &str, args: &str) -> Result<()>;

    /// Releases the handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Host`] if the attach interface reports a failure.
    fn detach(self: Box<Self>) -> Result<()>;
}

/// Host runtime services.
///
/// The host owns class loading. It reports what it supports, is told when a
/// session starts and ends, and carries out redefinition and retransformation
/// on the controller's behalf. For redefinition and retransformation the host
/// calls back into `on_code_event` with the matching event kind, and the
/// session's full transformer chain runs again.
pub trait HostRuntime: Send + Sync {
    /// Capabilities the host can grant.
    fn supported_capabilities(&self) -> CapabilitySet;

    /// Called once a session is active; the host starts delivering events.
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the listener. The session is then
    /// torn down again.
    fn install(&self, granted: CapabilitySet) -> Result<()> {
        let _ = granted;
        Ok(())
    }

    /// Called on detach; the host stops delivering events.
    fn uninstall(&self) {}

    /// Replaces the definitions of the given units.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Host`] if the host rejects any request.
    fn redefine(&self, requests: &[RedefinitionRequest]) -> Result<()>;

    /// Re-fires retransformation events for the named units.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Host`] if a unit is unknown or cannot be modified.
    fn retransform(&self, names: &[String]) -> Result<()>;

    /// Installs a prefix used to resolve wrapped native methods.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Host`] if the host rejects the prefix.
    fn set_native_method_prefix(&self, prefix: &str) -> Result<()>;

    /// Opens an attach handle on process `pid`.
    ///
    /// # Errors
    ///
    /// The default returns [`Error::Host`]: the host has no attach interface.
    fn attach_process(&self, pid: u32) -> Result<Box<dyn ProcessHandle>> {
        Err(Error::Host(format!(
            "no attach interface available for process {pid}"
        )))
    }
}
