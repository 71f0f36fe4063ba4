//! Shared fixtures for unit tests.
//!
//! - [`host`] - an in-memory [`HostRuntime`](crate::agent::HostRuntime) that records requests
//! - [`transformers`] - marker, failing, panicking and slow transformers


pub use host::FakeHost;
pub use transformers::{append_rule, FailingTransformer, HangingTransformer, PanickingTransformer};
