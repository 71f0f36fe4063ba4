//! Host double and transformer helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use classweave::prelude::*;

/// Records every host request; supports a configurable capability set.
pub struct RecordingHost {
    supported: CapabilitySet,
    pub redefined: Mutex<Vec<RedefinitionRequest>>,
    pub retransformed: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new(supported: CapabilitySet) -> Arc<Self> {
        Arc::new(Self {
            supported,
            redefined: Mutex::new(Vec::new()),
            retransformed: Mutex::new(Vec::new()),
        })
    }
}

impl HostRuntime for RecordingHost {
    fn supported_capabilities(&self) -> CapabilitySet {
        self.supported
    }

    fn redefine(&self, requests: &[RedefinitionRequest]) -> Result<()> {
        self.redefined.lock().unwrap().extend_from_slice(requests);
        Ok(())
    }

    fn retransform(&self, names: &[String]) -> Result<()> {
        self.retransformed.lock().unwrap().extend_from_slice(names);
        Ok(())
    }

    fn set_native_method_prefix(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }
}

/// Appends `marker`; restricted to `name` when given.
pub fn marker(id: &str, name: Option<&str>, marker: u8) -> Arc<dyn Transformer> {
    let rule = match name {
        Some(name) => TransformRule::new(id).match_name(name),
        None => TransformRule::new(id),
    };
    Arc::new(rule.rewrite_with(move |_, buffer| Ok(Some([buffer, &[marker]].concat()))))
}

/// Always fails with a rewrite error.
pub fn failing(id: &str) -> Arc<dyn Transformer> {
    let owner = id.to_string();
    Arc::new(TransformRule::new(id).rewrite_with(move |descriptor, _| {
        Err(Error::Codec(format!("{owner} cannot parse {}", descriptor.name())))
    }))
}

/// A controller with a host process of its own, so tests can run in parallel.
pub fn controller() -> AttachController {
    AttachController::in_process(Arc::new(HostProcess::new()))
}
