// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # classweave
//!
//! [![Crates.io](https://img.shields.io/crates/v/classweave.svg)](https://crates.io/crates/classweave)
//! [![Documentation](https://docs.rs/classweave/badge.svg)](https://docs.rs/classweave)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/classweave/blob/main/LICENSE-APACHE)
//!
//! An agent toolkit for managed runtimes: attach to a host process, intercept
//! code-loading events, and rewrite the binary definition of code units before
//! (or after) the host defines them.
//!
//! ## Features
//!
//! - **🔌 Two attach modes** - Launch-time and dynamic attach with per-process entry points
//! - **🧩 Composable transformers** - Closure rules, custom types, or codec-backed structured edits
//! - **🛡️ Failure isolation** - A failing, panicking or hanging transformer never aborts the chain
//! - **⚡ Lock-free callback path** - Concurrent host loader threads share an immutable snapshot
//! - **🔧 Capability negotiation** - Redefinition, retransformation and native-method prefixing
//! - **📊 Diagnostics** - Sequence-correlated event log with buffer digests
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use classweave::prelude::*;
//!
//! # struct Host;
//! # impl HostRuntime for Host {
//! #     fn supported_capabilities(&self) -> CapabilitySet { CapabilitySet::all() }
//! #     fn redefine(&self, _: &[RedefinitionRequest]) -> Result<()> { Ok(()) }
//! #     fn retransform(&self, _: &[String]) -> Result<()> { Ok(()) }
//! #     fn set_native_method_prefix(&self, _: &str) -> Result<()> { Ok(()) }
//! # }
//! let controller = AttachController::new();
//! controller.register(Arc::new(
//!     TransformRule::new("foo-marker")
//!         .match_name("Foo")
//!         .rewrite_with(|_, b| Ok(Some([b, &[0x01]].concat()))),
//! ))?;
//! controller.register(Arc::new(
//!     TransformRule::new("marker").rewrite_with(|_, b| Ok(Some([b, &[0x02]].concat()))),
//! ))?;
//! controller.attach(AttachMode::Launch, Arc::new(Host), vec![])?;
//!
//! let foo = CodeUnitDescriptor::initial_load("Foo", ScopeId(1));
//! assert_eq!(
//!     controller.on_code_event(&foo, &[0x00])?,
//!     RewriteResult::Rewritten(vec![0x00, 0x01, 0x02])
//! );
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Data flows from the host into the [`agent::AttachController`], through the
//! session's [`registry::RegistrySnapshot`] (matching), into the
//! [`pipeline::RewritePipeline`] (application), and back to the host as a
//! [`pipeline::RewriteResult`].
//!
//! - [`unit`] - Transformers, descriptors, matchers and the rule builder
//! - [`registry`] - Ordered transformer registry with copy-on-write snapshots
//! - [`pipeline`] - Chained, failure-isolated rewriting
//! - [`capability`] - Host capabilities and their once-per-session negotiation
//! - [`agent`] - Attach controller, sessions, host interface and entry points
//! - [`codec`] - Structured editing through a low-level codec
//! - [`diagnostics`] - Per-session event log
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger.
//! Attach, detach and host requests are logged at `info`, transformer failures
//! and escalations at `warn`, per-event detail at `trace`.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Setup errors
//! (registration, negotiation, attach) are returned to the caller directly;
//! per-transformer failures are collected into the [`pipeline::RewriteResult`]
//! unless the session's [`agent::FailurePolicy`] escalates them.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use classweave::prelude::*;
///
/// let rule = TransformRule::new("noop").with_priority(Priority::LAST);
/// assert_eq!(rule.priority(), Priority::LAST);
/// ```
pub mod prelude;

pub mod agent;
pub mod capability;
pub mod codec;
pub mod diagnostics;
pub mod pipeline;
pub mod registry;
pub mod unit;

/// `classweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust
/// use classweave::{registry::TransformerRegistry, Result};
///
/// fn empty_registry() -> Result<TransformerRegistry> {
///     Ok(TransformerRegistry::new())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `classweave` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
