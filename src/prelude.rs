//! # classweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the classweave library. Import this module to get quick access to everything an
//! agent needs to attach, register transformers and serve code events.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all classweave operations
pub use crate::Error;

/// The result type used throughout classweave
pub use crate::Result;

// ================================================================================================
// Transform Units
// ================================================================================================

/// The transformer interface and ordering
pub use crate::unit::{Priority, Transformer};

/// What a code event is about
pub use crate::unit::{CodeEventKind, CodeUnitDescriptor, ScopeId};

/// Closure-based rules and matchers
pub use crate::unit::{
    EventKindMatcher, NameMatcher, PredicateMatcher, PrefixMatcher, ScopeMatcher, TransformRule,
    UnitMatcher,
};

// ================================================================================================
// Registry and Pipeline
// ================================================================================================

/// Ordered transformer storage
pub use crate::registry::{RegistrySnapshot, TransformerRegistry};

/// Chain application and its outcomes
pub use crate::pipeline::{FailureCause, Quarantine, RewritePipeline, RewriteResult, UnitFailure};

// ================================================================================================
// Capabilities
// ================================================================================================

/// Host capabilities and negotiation
pub use crate::capability::{
    Capability, CapabilityNegotiator, CapabilityRequest, CapabilitySet, NegotiationState,
};

// ================================================================================================
// Agent Lifecycle
// ================================================================================================

/// Attaching, sessions and the host interface
pub use crate::agent::{
    active_session, agent_main, launch_main, self_attach, AgentConfig, AttachController,
    AttachMode, AttachSession, FailurePolicy, HostProcess, HostRuntime, ProcessHandle,
    RedefinitionRequest, SessionInfo,
};

// ================================================================================================
// Codec and Diagnostics
// ================================================================================================

/// Structured editing
pub use crate::codec::{Codec, CodecTransformer, RawCodec};

/// Session event log
pub use crate::diagnostics::{Diagnostics, EventOutcome, RewriteEvent};
