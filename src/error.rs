use std::time::Duration;

use thiserror::Error;

use crate::capability::Capability;

/// Builds an [`Error::Rewrite`] carrying the source location it was raised at.
///
/// Intended for [`Transformer::rewrite`](crate::unit::Transformer::rewrite)
/// implementations that reject their input.
///
/// # Examples
///
/// ```rust
/// use classweave::{rewrite_error, Error};
///
/// let err: Error = rewrite_error!("unexpected magic {:#x}", 0xdead_u32);
/// assert!(err.to_string().contains("unexpected magic 0xdead"));
/// ```
#[macro_export]
macro_rules! rewrite_error {
    // Single string version
    ($msg:expr) => {
        $crate::Error::Rewrite {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Rewrite {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Setup errors (registry, negotiation, attach) are returned
/// synchronously to whoever called the failing operation. Rewrite errors raised by a single
/// transformer never surface through this type on the host callback path; the pipeline
/// isolates them into a [`crate::pipeline::UnitFailure`] instead. Only an explicit
/// [`crate::agent::FailurePolicy::Fatal`] turns such a failure back into
/// [`Error::RewriteFailed`].
///
/// # Error Categories
///
/// ## Registry Errors
/// - [`Error::DuplicateIdentity`] - A transformer with the same identity is already registered
/// - [`Error::NotFound`] - No transformer with the given identity is registered
///
/// ## Session Errors
/// - [`Error::AlreadyAttached`] - Launch attach repeated, or a session is already active
/// - [`Error::SessionClosed`] - The session has been detached
///
/// ## Capability Errors
/// - [`Error::UnsupportedCapability`] - An operation needs a capability the session was not granted
/// - [`Error::HostUnsupported`] - A required capability cannot be granted by the host
/// - [`Error::AlreadyNegotiated`] - Negotiation was attempted twice in one session
/// - [`Error::NotNegotiated`] - Granted capabilities were read before negotiation
///
/// ## Rewrite Errors
/// - [`Error::Rewrite`] - A transformer could not rewrite a buffer
/// - [`Error::RewriteFailed`] - A per-unit failure escalated by the fatal policy
/// - [`Error::Timeout`] - A transformer exceeded the configured time bound
/// - [`Error::Codec`] - Decoding or encoding a code buffer failed
///
/// # Examples
///
/// ```rust,no_run
/// use classweave::{agent::AttachController, Error};
///
/// let controller = AttachController::new();
/// match controller.detach() {
///     Ok(info) => println!("detached {info}"),
///     Err(Error::SessionClosed) => eprintln!("no active session"),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A transformer with this identity is already registered.
    ///
    /// Identities are unique within a registry; re-registering the same
    /// identity requires unregistering it first.
    #[error("A transformer with identity '{0}' is already registered")]
    DuplicateIdentity(String),

    /// No transformer with this identity is registered.
    #[error("No transformer with identity '{0}' is registered")]
    NotFound(String),

    /// The controller is already attached.
    ///
    /// Returned when launch attach is invoked more than once in the same
    /// host process, or when any attach is attempted while a session is
    /// active in that process.
    #[error("The agent is already attached")]
    AlreadyAttached,

    /// The attach session has been closed.
    ///
    /// Every callback or session operation after [`detach`](crate::agent::AttachController::detach)
    /// fails with this error instead of silently doing nothing.
    #[error("The attach session is closed")]
    SessionClosed,

    /// The operation needs a capability that was not granted for this session.
    #[error("Capability '{0}' was not granted for this session")]
    UnsupportedCapability(Capability),

    /// The host cannot grant a capability the caller required.
    #[error("The host does not support required capability '{0}'")]
    HostUnsupported(Capability),

    /// Capabilities were already negotiated for this session.
    #[error("Capabilities have already been negotiated for this session")]
    AlreadyNegotiated,

    /// Granted capabilities were queried before negotiation took place.
    #[error("Capabilities have not been negotiated yet")]
    NotNegotiated,

    /// A transformer could not rewrite the buffer it was given.
    ///
    /// # Fields
    ///
    /// * `message` - Description of what went wrong
    /// * `file` - Source file where the error was raised
    /// * `line` - Source line where the error was raised
    #[error("Rewrite - {file}:{line}: {message}")]
    Rewrite {
        /// The message to be printed for the Rewrite error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A per-unit rewrite failure escalated by [`crate::agent::FailurePolicy::Fatal`].
    #[error("Transformer '{unit}' failed: {cause}")]
    RewriteFailed {
        /// Identity of the failing transformer
        unit: String,
        /// Rendered failure cause
        cause: String,
    },

    /// A transformer exceeded the configured time bound.
    #[error("Transformer '{unit}' did not finish within {limit:?}")]
    Timeout {
        /// Identity of the transformer that timed out
        unit: String,
        /// The configured limit
        limit: Duration,
    },

    /// The agent configuration or argument string is invalid.
    #[error("Invalid agent configuration - {0}")]
    InvalidConfig(String),

    /// Decoding or encoding a code buffer failed.
    #[error("Codec error - {0}")]
    Codec(String),

    /// The host runtime rejected a request.
    #[error("Host runtime error - {0}")]
    Host(String),

    /// Failed to lock target.
    ///
    /// This error occurs when a lock guarding registry or session state has
    /// been poisoned by a panicking writer.
    #[error("Failed to lock target")]
    LockError,
}
