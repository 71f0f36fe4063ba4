//! Optional host capabilities and their per-session negotiation.
//!
//! A host runtime may or may not allow an attached agent to redefine loaded
//! code units, to retransform units that are already executing, or to
//! substitute a prefix for native method names. Each attach session negotiates
//! these exactly once with a [`CapabilityNegotiator`]:
//!
//! ```text
//! Unqueried ──negotiate()──► Queried ──all required granted──► Granted(set)
//!                               │
//!                               └──required missing──► stays Queried, HostUnsupported
//! ```
//!
//! A second `negotiate` call in the same session fails with
//! [`Error::AlreadyNegotiated`] regardless of how the first one ended.
//! Reading the granted set is always allowed once negotiation succeeded.

use std::{fmt, str::FromStr, sync::Mutex};

use bitflags::bitflags;
use strum::IntoEnumIterator;

use crate::{Error, Result};

/// A single optional capability a host runtime can grant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Replace the definition of a loaded code unit.
    Redefine,
    /// Re-run the transformer chain over a unit that may already be executing.
    Retransform,
    /// Substitute a prefix for native method names when resolving them.
    NativePrefix,
}

impl Capability {
    /// Returns the single-bit set for this capability.
    #[must_use]
    pub const fn flag(self) -> CapabilitySet {
        match self {
            Capability::Redefine => CapabilitySet::REDEFINE,
            Capability::Retransform => CapabilitySet::RETRANSFORM,
            Capability::NativePrefix => CapabilitySet::NATIVE_PREFIX,
        }
    }
}

bitflags! {
    /// A set of [`Capability`] values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilitySet: u8 {
        /// [`Capability::Redefine`]
        const REDEFINE = 0x01;
        /// [`Capability::Retransform`]
        const RETRANSFORM = 0x02;
        /// [`Capability::NativePrefix`]
        const NATIVE_PREFIX = 0x04;
    }
}

impl CapabilitySet {
    /// Returns `true` if `capability` is a member of this set.
    #[must_use]
    pub fn has(self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// Iterates the members of this set in declaration order.
    pub fn capabilities(self) -> impl Iterator<Item = Capability> {
        Capability::iter().filter(move |c| self.has(*c))
    }
}

impl From<Capability> for CapabilitySet {
    fn from(capability: Capability) -> Self {
        capability.flag()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::empty(), |set, c| set | c.flag())
    }
}

impl FromStr for CapabilitySet {
    type Err = Error;

    /// Parses a `+`-separated list such as `redefine+retransform`.
    ///
    /// `none` and the empty string both yield the empty set.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(CapabilitySet::empty());
        }

        s.split('+')
            .map(|part| {
                Capability::from_str(part.trim()).map_err(|_| {
                    Error::InvalidConfig(format!("unknown capability '{}'", part.trim()))
                })
            })
            .collect()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&'static str> = self.capabilities().map(<&'static str>::from).collect();
        f.write_str(&names.join("+"))
    }
}

/// What a caller asks the host for.
///
/// `requested` capabilities are granted when available and silently dropped
/// otherwise. `required` capabilities fail negotiation when the host cannot
/// grant them. Required capabilities are implicitly requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityRequest {
    /// Capabilities wanted if available.
    pub requested: CapabilitySet,
    /// Capabilities without which the session must not start.
    pub required: CapabilitySet,
}

impl CapabilityRequest {
    /// Requests `requested` without requiring anything.
    #[must_use]
    pub fn new(requested: CapabilitySet) -> Self {
        Self {
            requested,
            required: CapabilitySet::empty(),
        }
    }

    /// Marks `required` as mandatory.
    #[must_use]
    pub fn require(mut self, required: CapabilitySet) -> Self {
        self.required |= required;
        self
    }

    /// All capabilities this request asks for, required ones included.
    #[must_use]
    pub fn wanted(&self) -> CapabilitySet {
        self.requested | self.required
    }
}

/// Negotiation progress for one attach session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// The host has not been asked yet.
    Unqueried,
    /// The host was asked; negotiation did not (or not yet) produce a grant.
    Queried {
        /// What the host reported as supported.
        supported: CapabilitySet,
    },
    /// Negotiation finished with this granted set.
    Granted(CapabilitySet),
}

/// Negotiates optional host capabilities once per attach session.
///
/// The negotiator is shared by reference between the controller and its
/// session, so its state sits behind a mutex. Negotiation itself is rare;
/// reads of the granted set after negotiation are cheap.
///
/// # Examples
///
/// ```rust
/// use classweave::capability::{CapabilityNegotiator, CapabilityRequest, CapabilitySet};
///
/// let negotiator = CapabilityNegotiator::new();
/// let host = CapabilitySet::REDEFINE;
/// let granted = negotiator.negotiate(
///     host,
///     &CapabilityRequest::new(CapabilitySet::REDEFINE | CapabilitySet::RETRANSFORM),
/// )?;
/// assert_eq!(granted, CapabilitySet::REDEFINE);
/// assert!(negotiator.negotiate(host, &CapabilityRequest::default()).is_err());
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Debug)]
pub struct CapabilityNegotiator {
    state: Mutex<NegotiationState>,
}

impl Default for CapabilityNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityNegotiator {
    /// Creates a negotiator in the [`NegotiationState::Unqueried`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NegotiationState::Unqueried),
        }
    }

    /// Negotiates `request` against what the host reports as `supported`.
    ///
    /// Returns the granted set: the intersection of the wanted and supported
    /// capabilities.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyNegotiated`] if this negotiator was already queried
    /// - [`Error::HostUnsupported`] for the first required capability the host lacks
    pub fn negotiate(
        &self,
        supported: CapabilitySet,
        request: &CapabilityRequest,
    ) -> Result<CapabilitySet> {
        let mut state = lock!(self.state);
        if *state != NegotiationState::Unqueried {
            return Err(Error::AlreadyNegotiated);
        }
        *state = NegotiationState::Queried { supported };

        if let Some(missing) = request
            .required
            .capabilities()
            .find(|c| !supported.has(*c))
        {
            log::warn!("host cannot grant required capability '{missing}' (supports: {supported})");
            return Err(Error::HostUnsupported(missing));
        }

        let granted = request.wanted() & supported;
        log::debug!("negotiated capabilities: wanted {}, granted {granted}", request.wanted());
        *state = NegotiationState::Granted(granted);
        Ok(granted)
    }

    /// Returns the current negotiation state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the state lock is poisoned.
    pub fn state(&self) -> Result<NegotiationState> {
        Ok(*lock!(self.state))
    }

    /// Returns the granted set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotNegotiated`] unless negotiation has succeeded.
    pub fn granted(&self) -> Result<CapabilitySet> {
        match *lock!(self.state) {
            NegotiationState::Granted(granted) => Ok(granted),
            _ => Err(Error::NotNegotiated),
        }
    }

    /// Checks that `capability` was granted.
    ///
    /// # Errors
    ///
    /// - [`Error::NotNegotiated`] if negotiation has not succeeded
    /// - [`Error::UnsupportedCapability`] if the capability was not granted
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.granted()?.has(capability) {
            Ok(())
        } else {
            Err(Error::UnsupportedCapability(capability))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_parse_and_display() {
        let set: CapabilitySet = "redefine+native_prefix".parse().unwrap();
        assert_eq!(set, CapabilitySet::REDEFINE | CapabilitySet::NATIVE_PREFIX);
        assert_eq!(set.to_string(), "redefine+native_prefix");

        assert_eq!("none".parse::<CapabilitySet>().unwrap(), CapabilitySet::empty());
        assert_eq!("".parse::<CapabilitySet>().unwrap(), CapabilitySet::empty());
        assert!(matches!(
            "redefine+teleport".parse::<CapabilitySet>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_capability_set_iteration_order() {
        let all = CapabilitySet::all();
        let caps: Vec<_> = all.capabilities().collect();
        assert_eq!(
            caps,
            vec![
                Capability::Redefine,
                Capability::Retransform,
                Capability::NativePrefix
            ]
        );
        let collected: CapabilitySet = caps.into_iter().collect();
        assert_eq!(collected, all);
    }

    #[test]
    fn test_negotiate_returns_intersection() {
        let negotiator = CapabilityNegotiator::new();
        let granted = negotiator
            .negotiate(
                CapabilitySet::REDEFINE | CapabilitySet::NATIVE_PREFIX,
                &CapabilityRequest::new(CapabilitySet::REDEFINE | CapabilitySet::RETRANSFORM),
            )
            .unwrap();

        assert_eq!(granted, CapabilitySet::REDEFINE);
        assert_eq!(negotiator.granted().unwrap(), CapabilitySet::REDEFINE);
        assert_eq!(
            negotiator.state().unwrap(),
            NegotiationState::Granted(CapabilitySet::REDEFINE)
        );
    }

    #[test]
    fn test_negotiate_required_missing() {
        let negotiator = CapabilityNegotiator::new();
        let request = CapabilityRequest::new(CapabilitySet::REDEFINE)
            .require(CapabilitySet::RETRANSFORM);

        let result = negotiator.negotiate(CapabilitySet::REDEFINE, &request);
        assert!(matches!(
            result,
            Err(Error::HostUnsupported(Capability::Retransform))
        ));
        assert_eq!(
            negotiator.state().unwrap(),
            NegotiationState::Queried {
                supported: CapabilitySet::REDEFINE
            }
        );
        assert!(matches!(negotiator.granted(), Err(Error::NotNegotiated)));
    }

    #[test]
    fn test_negotiate_twice_fails() {
        let negotiator = CapabilityNegotiator::new();
        let request = CapabilityRequest::new(CapabilitySet::all());
        negotiator.negotiate(CapabilitySet::all(), &request).unwrap();

        assert!(matches!(
            negotiator.negotiate(CapabilitySet::all(), &request),
            Err(Error::AlreadyNegotiated)
        ));
        // Reads stay available and unchanged.
        assert_eq!(negotiator.granted().unwrap(), CapabilitySet::all());
        assert_eq!(negotiator.granted().unwrap(), CapabilitySet::all());
    }

    #[test]
    fn test_negotiate_twice_after_failure_fails() {
        let negotiator = CapabilityNegotiator::new();
        let request = CapabilityRequest::default().require(CapabilitySet::NATIVE_PREFIX);
        assert!(negotiator
            .negotiate(CapabilitySet::empty(), &request)
            .is_err());
        assert!(matches!(
            negotiator.negotiate(CapabilitySet::all(), &request),
            Err(Error::AlreadyNegotiated)
        ));
    }

    #[test]
    fn test_require() {
        let negotiator = CapabilityNegotiator::new();
        assert!(matches!(
            negotiator.require(Capability::Redefine),
            Err(Error::NotNegotiated)
        ));

        negotiator
            .negotiate(
                CapabilitySet::REDEFINE,
                &CapabilityRequest::new(CapabilitySet::all()),
            )
            .unwrap();
        assert!(negotiator.require(Capability::Redefine).is_ok());
        assert!(matches!(
            negotiator.require(Capability::NativePrefix),
            Err(Error::UnsupportedCapability(Capability::NativePrefix))
        ));
    }
}
