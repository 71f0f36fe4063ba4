//! Agent lifecycle: attaching to a host runtime and serving its code events.
//!
//! The [`AttachController`] owns the transformer registry and at most one
//! active [`AttachSession`]. Attaching registers the initial transformers,
//! negotiates capabilities with the [`HostRuntime`], snapshots the registry and
//! installs the session. From then on the host delivers every code event to
//! [`AttachController::on_code_event`], which runs the session's chain through
//! the rewrite pipeline.
//!
//! # Attach Modes
//!
//! | Mode | Entry point | Behaviour |
//! |------|-------------|-----------|
//! | [`AttachMode::Launch`] | [`launch_main`] | Before application code loads; once per process |
//! | [`AttachMode::Dynamic`] | [`agent_main`] | Into a running process; requested reload capabilities must be granted |
//!
//! A process may also load an agent into itself with [`self_attach`], which
//! goes through the host's attach interface and ends in a dynamic attach.
//! Whatever attached, [`active_session`] returns the session active in the
//! current process.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use classweave::{
//!     agent::{AttachController, AttachMode, HostRuntime, RedefinitionRequest},
//!     capability::CapabilitySet,
//!     pipeline::RewriteResult,
//!     unit::{CodeUnitDescriptor, ScopeId, TransformRule},
//!     Result,
//! };
//!
//! struct Host;
//!
//! impl HostRuntime for Host {
//!     fn supported_capabilities(&self) -> CapabilitySet {
//!         CapabilitySet::all()
//!     }
//!     fn redefine(&self, _: &[RedefinitionRequest]) -> Result<()> {
//!         Ok(())
//!     }
//!     fn retransform(&self, _: &[String]) -> Result<()> {
//!         Ok(())
//!     }
//!     fn set_native_method_prefix(&self, _: &str) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let controller = AttachController::new();
//! controller.attach(
//!     AttachMode::Dynamic,
//!     Arc::new(Host),
//!     vec![Arc::new(
//!         TransformRule::new("mark").rewrite_with(|_, b| Ok(Some([b, &[0xAA]].concat()))),
//!     )],
//! )?;
//!
//! let result = controller.on_code_event(
//!     &CodeUnitDescriptor::initial_load("app/Main", ScopeId(1)),
//!     &[0xCA, 0xFE],
//! )?;
//! assert_eq!(result, RewriteResult::Rewritten(vec![0xCA, 0xFE, 0xAA]));
//!
//! controller.detach()?;
//! # Ok::<(), classweave::Error>(())
//! ```

mod config;
mod controller;
mod host;
mod process;
mod session;

use std::sync::Arc;

pub use config::{AgentConfig, FailurePolicy};
pub use controller::{AttachController, AttachMode};
pub use host::{HostRuntime, ProcessHandle, RedefinitionRequest};
pub use process::HostProcess;
pub use session::{AttachSession, LoadedUnit, RetransformReport, SessionInfo};

use crate::{unit::Transformer, Error, Result};

/// Launch-time entry point: attaches the global controller before application
/// code loads.
///
/// `args` is the agent argument string, parsed by [`AgentConfig::from_args`].
///
/// # Errors
///
/// Returns [`crate::Error::InvalidConfig`] for bad arguments, plus the errors
/// of [`AttachController::attach_with_config`].
pub fn launch_main(
    args: &str,
    host: Arc<dyn HostRuntime>,
    units: Vec<Arc<dyn Transformer>>,
) -> Result<Arc<AttachSession>> {
    entry(AttachMode::Launch, args, host, units)
}

/// Dynamic entry point: attaches the global controller to a running process.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidConfig`] for bad arguments, plus the errors
/// of [`AttachController::attach_with_config`].
pub fn agent_main(
    args: &str,
    host: Arc<dyn HostRuntime>,
    units: Vec<Arc<dyn Transformer>>,
) -> Result<Arc<AttachSession>> {
    entry(AttachMode::Dynamic, args, host, units)
}

fn entry(
    mode: AttachMode,
    args: &str,
    host: Arc<dyn HostRuntime>,
    units: Vec<Arc<dyn Transformer>>,
) -> Result<Arc<AttachSession>> {
    let config = AgentConfig::from_args(args)?;
    log::debug!("{mode} entry with {config:?}");
    AttachController::global().attach_with_config(mode, host, units, config)
}

/// The session active in the current process, whichever controller started it.
///
/// # Errors
///
/// Returns [`Error::SessionClosed`] if nothing is attached.
pub fn active_session() -> Result<Arc<AttachSession>> {
    HostProcess::current().session()
}

/// Loads `agent` into the current process through the host's attach interface.
///
/// Opens a handle on this process, asks it to load `agent` with `args`, and
/// releases the handle whether or not loading succeeded. Concurrent calls are
/// serialized. The loaded agent normally reaches [`agent_main`].
///
/// # Errors
///
/// - [`Error::InvalidConfig`] for a blank `agent`
/// - any error from [`HostRuntime::attach_process`], [`ProcessHandle::load_agent`]
///   or [`ProcessHandle::detach`]; a load error wins over a detach error
pub fn self_attach(host: &dyn HostRuntime, agent: &str, args: &str) -> Result<()> {
    if agent.trim().is_empty() {
        return Err(Error::InvalidConfig("agent must not be blank".to_string()));
    }

    let _serial = HostProcess::current().self_attach_lock()?;
    let pid = std::process::id();
    let mut handle = host.attach_process(pid)?;
    log::info!("loading agent '{agent}' into process {}", handle.process_id());

    let loaded = handle.load_agent(agent, args);
    let detached = handle.detach();
    if let (Ok(()), Err(error)) = (&loaded, &detached) {
        log::warn!("releasing attach handle on process {pid} failed: {error}");
    }
    loaded.and(detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capability::CapabilitySet,
        test::FakeHost,
    };

    struct NoAttachHost;

    impl HostRuntime for NoAttachHost {
        fn supported_capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty()
        }
        fn redefine(&self, _: &[RedefinitionRequest]) -> Result<()> {
            Ok(())
        }
        fn retransform(&self, _: &[String]) -> Result<()> {
            Ok(())
        }
        fn set_native_method_prefix(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_self_attach_loads_and_releases() {
        let host = FakeHost::full();
        self_attach(&host, "weave-agent.so", "timeout_ms=5").unwrap();
        assert_eq!(
            host.attach_log(),
            vec![
                format!("attach {}", std::process::id()),
                "load weave-agent.so timeout_ms=5".to_string(),
                "detach".to_string(),
            ]
        );
    }

    #[test]
    fn test_self_attach_releases_after_refusal() {
        let host = FakeHost::full().refusing_agent();
        let err = self_attach(&host, "weave-agent.so", "").unwrap_err();
        assert!(matches!(err, Error::Host(_)));
        assert_eq!(host.attach_log().last().map(String::as_str), Some("detach"));
    }

    #[test]
    fn test_self_attach_blank_agent() {
        let host = FakeHost::full();
        assert!(matches!(
            self_attach(&host, "  ", ""),
            Err(Error::InvalidConfig(_))
        ));
        assert!(host.attach_log().is_empty());
    }

    #[test]
    fn test_self_attach_without_attach_interface() {
        assert!(matches!(
            self_attach(&NoAttachHost, "weave-agent.so", ""),
            Err(Error::Host(_))
        ));
    }
}
