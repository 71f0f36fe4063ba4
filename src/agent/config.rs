//! Configuration for attach sessions.
//!
//! [`AgentConfig`] is a plain struct with public fields. Embedders build it in
//! code; the launch and dynamic entry points build it from the agent argument
//! string with [`AgentConfig::from_args`].

use std::{str::FromStr, time::Duration};

use strum::{Display, EnumString};

use crate::{
    capability::{CapabilityRequest, CapabilitySet},
    diagnostics::DEFAULT_CAPACITY,
    Error, Result,
};

/// What `on_code_event` does when a transformer fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FailurePolicy {
    /// Return a `Failed` result and let the host decide (default).
    #[default]
    Isolate,
    /// Turn the first failure into an error; the host keeps the original buffer.
    Fatal,
}

/// Configuration for one attach session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Capabilities asked for if available (default: redefine + retransform).
    pub requested: CapabilitySet,

    /// Capabilities the session cannot start without (default: none).
    pub required: CapabilitySet,

    /// Handling of per-transformer failures (default: isolate).
    pub failure_policy: FailurePolicy,

    /// Per-transformer time limit (default: none, transformers run inline).
    pub rewrite_timeout: Option<Duration>,

    /// Remember every loaded unit's current buffer so it can be retransformed
    /// later with `retransform_loaded` (default: true).
    pub track_loaded_units: bool,

    /// Retransform tracked units in parallel (default: true).
    pub parallel_retransform: bool,

    /// Most diagnostics events a session keeps; `0` turns recording off
    /// (default: [`DEFAULT_CAPACITY`]).
    pub diagnostics_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            requested: CapabilitySet::REDEFINE | CapabilitySet::RETRANSFORM,
            required: CapabilitySet::empty(),
            failure_policy: FailurePolicy::Isolate,
            rewrite_timeout: None,
            track_loaded_units: true,
            parallel_retransform: true,
            diagnostics_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration for hosts where a misbehaving transformer must
    /// never hold up loading: 250ms limit per transformer, failures escalated.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            failure_policy: FailurePolicy::Fatal,
            rewrite_timeout: Some(Duration::from_millis(250)),
            ..Self::default()
        }
    }

    /// Creates a configuration that only rewrites at initial load: no reload
    /// capabilities requested and nothing tracked.
    #[must_use]
    pub fn load_only() -> Self {
        Self {
            requested: CapabilitySet::empty(),
            track_loaded_units: false,
            ..Self::default()
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the per-transformer time limit.
    #[must_use]
    pub fn with_rewrite_timeout(mut self, limit: Duration) -> Self {
        self.rewrite_timeout = Some(limit);
        self
    }

    /// Sets how many diagnostics events a session keeps; `0` turns recording off.
    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Adds `capabilities` to the requested set.
    #[must_use]
    pub fn with_requested(mut self, capabilities: CapabilitySet) -> Self {
        self.requested |= capabilities;
        self
    }

    /// Adds `capabilities` to the required set.
    #[must_use]
    pub fn with_required(mut self, capabilities: CapabilitySet) -> Self {
        self.required |= capabilities;
        self
    }

    /// The capability request negotiated at attach.
    #[must_use]
    pub fn capability_request(&self) -> CapabilityRequest {
        CapabilityRequest::new(self.requested).require(self.required)
    }

    /// Checks the configuration for values no session can work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero rewrite timeout.
    pub fn validate(&self) -> Result<()> {
        if self.rewrite_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "rewrite timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the agent argument string passed to the entry points.
    ///
    /// The format is comma-separated `key=value` pairs; whitespace around keys
    /// and values is ignored and an empty string yields the defaults.
    ///
    /// | Key | Value |
    /// |-----|-------|
    /// | `timeout_ms` | per-transformer limit in milliseconds, `0` for none |
    /// | `policy` | `isolate` or `fatal` |
    /// | `request` | capabilities joined with `+`, or `none` |
    /// | `require` | capabilities joined with `+`, or `none` |
    /// | `track` | `true` or `false` |
    /// | `parallel` | `true` or `false` |
    /// | `diagnostics` | most events kept, `0` to turn recording off |
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use classweave::{agent::{AgentConfig, FailurePolicy}, capability::CapabilitySet};
    ///
    /// let config = AgentConfig::from_args("timeout_ms=50, policy=fatal, require=retransform")?;
    /// assert_eq!(config.rewrite_timeout, Some(Duration::from_millis(50)));
    /// assert_eq!(config.failure_policy, FailurePolicy::Fatal);
    /// assert_eq!(config.required, CapabilitySet::RETRANSFORM);
    /// # Ok::<(), classweave::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for malformed pairs, unknown keys, or
    /// values that do not parse.
    pub fn from_args(args: &str) -> Result<Self> {
        let mut config = Self::default();

        for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| Error::InvalidConfig(format!("expected key=value, found '{pair}'")))?;

            match key {
                "timeout_ms" => {
                    let ms: u64 = parse_value(key, value)?;
                    config.rewrite_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                }
                "policy" => {
                    config.failure_policy = FailurePolicy::from_str(value).map_err(|_| {
                        Error::InvalidConfig(format!("unknown failure policy '{value}'"))
                    })?;
                }
                "request" => config.requested = CapabilitySet::from_str(value)?,
                "require" => config.required = CapabilitySet::from_str(value)?,
                "track" => config.track_loaded_units = parse_value(key, value)?,
                "parallel" => config.parallel_retransform = parse_value(key, value)?,
                "diagnostics" => config.diagnostics_capacity = parse_value(key, value)?,
                _ => return Err(Error::InvalidConfig(format!("unknown agent option '{key}'"))),
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid value '{value}' for '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(
            config.requested,
            CapabilitySet::REDEFINE | CapabilitySet::RETRANSFORM
        );
        assert!(config.required.is_empty());
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.rewrite_timeout, None);
        assert!(config.track_loaded_units);
        assert!(config.parallel_retransform);
        assert_eq!(config.diagnostics_capacity, DEFAULT_CAPACITY);
        assert_eq!(AgentConfig::from_args("").unwrap(), config);
        assert_eq!(AgentConfig::from_args(" , ").unwrap(), config);
    }

    #[test]
    fn test_from_args_all_keys() {
        let config = AgentConfig::from_args(
            "timeout_ms=10,policy=Fatal,request=native_prefix,require=redefine,track=false,parallel=false,diagnostics=0",
        )
        .unwrap();
        assert_eq!(config.rewrite_timeout, Some(Duration::from_millis(10)));
        assert_eq!(config.failure_policy, FailurePolicy::Fatal);
        assert_eq!(config.requested, CapabilitySet::NATIVE_PREFIX);
        assert_eq!(config.required, CapabilitySet::REDEFINE);
        assert!(!config.track_loaded_units);
        assert!(!config.parallel_retransform);
        assert_eq!(config.diagnostics_capacity, 0);
        assert_eq!(
            config.capability_request().wanted(),
            CapabilitySet::NATIVE_PREFIX | CapabilitySet::REDEFINE
        );
    }

    #[test]
    fn test_from_args_zero_timeout_disables() {
        let config = AgentConfig::from_args("timeout_ms=0").unwrap();
        assert_eq!(config.rewrite_timeout, None);
    }

    #[test]
    fn test_from_args_errors() {
        for args in [
            "verbose=true",
            "timeout_ms",
            "timeout_ms=soon",
            "policy=abort",
            "request=teleport",
            "track=maybe",
            "diagnostics=-1",
        ] {
            let err = AgentConfig::from_args(args).unwrap_err();
            assert!(
                matches!(err, Error::InvalidConfig(_)),
                "'{args}' gave {err:?}"
            );
        }
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = AgentConfig::new().with_rewrite_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_presets() {
        let strict = AgentConfig::strict();
        assert_eq!(strict.failure_policy, FailurePolicy::Fatal);
        assert!(strict.rewrite_timeout.is_some());

        let load_only = AgentConfig::load_only();
        assert!(load_only.requested.is_empty());
        assert!(!load_only.track_loaded_units);
    }
}
