//! Outcome types of one pipeline run.

use std::{fmt, time::Duration};

use crate::Error;

/// Why a single transformer failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The transformer returned an error.
    Error(String),
    /// The transformer panicked; the payload message is kept when it is a string.
    Panic(String),
    /// The transformer did not finish within the configured limit.
    Timeout(Duration),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Error(msg) => write!(f, "error: {msg}"),
            FailureCause::Panic(msg) => write!(f, "panic: {msg}"),
            FailureCause::Timeout(limit) => write!(f, "timed out after {limit:?}"),
        }
    }
}

/// A failure of one transformer during one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Identity of the failed transformer.
    pub unit: String,
    /// What went wrong.
    pub cause: FailureCause,
}

impl UnitFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(unit: impl Into<String>, cause: FailureCause) -> Self {
        Self {
            unit: unit.into(),
            cause,
        }
    }

    /// Converts this failure into the crate error used when it is escalated.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.cause {
            FailureCause::Timeout(limit) => Error::Timeout {
                unit: self.unit,
                limit,
            },
            cause => Error::RewriteFailed {
                unit: self.unit,
                cause: cause.to_string(),
            },
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.unit, self.cause)
    }
}

/// Outcome of rewriting one code unit.
///
/// The pipeline never returns a partially applied buffer: every buffer in
/// here is the complete output of the last transformer that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteResult {
    /// No transformer changed the buffer and none failed.
    Unchanged,
    /// The buffer was rewritten and no transformer failed.
    Rewritten(Vec<u8>),
    /// At least one transformer failed.
    ///
    /// The remaining transformers still ran against the last good buffer.
    /// `buffer` holds their combined output when it differs from the input,
    /// so the host may still install it; `None` means nothing survived that
    /// changed the input.
    Failed {
        /// Every failure, in chain order.
        failures: Vec<UnitFailure>,
        /// Output of the surviving transformers, if it differs from the input.
        buffer: Option<Vec<u8>>,
    },
}

impl RewriteResult {
    /// Returns `true` if a changed buffer is available.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(
            self,
            RewriteResult::Rewritten(_) | RewriteResult::Failed { buffer: Some(_), .. }
        )
    }

    /// Returns `true` if any transformer failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, RewriteResult::Failed { .. })
    }

    /// The failures recorded for this run (empty unless [`is_failed`](Self::is_failed)).
    #[must_use]
    pub fn failures(&self) -> &[UnitFailure] {
        match self {
            RewriteResult::Failed { failures, .. } => failures.as_slice(),
            _ => &[],
        }
    }

    /// The changed buffer, if any.
    #[must_use]
    pub fn buffer(&self) -> Option<&[u8]> {
        match self {
            RewriteResult::Rewritten(buffer)
            | RewriteResult::Failed {
                buffer: Some(buffer),
                ..
            } => Some(buffer.as_slice()),
            _ => None,
        }
    }

    /// Consumes the result, returning the changed buffer if any.
    #[must_use]
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            RewriteResult::Rewritten(buffer) => Some(buffer),
            RewriteResult::Failed { buffer, .. } => buffer,
            RewriteResult::Unchanged => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_accessors() {
        assert!(!RewriteResult::Unchanged.is_changed());
        assert!(RewriteResult::Unchanged.failures().is_empty());

        let rewritten = RewriteResult::Rewritten(vec![1, 2]);
        assert!(rewritten.is_changed());
        assert_eq!(rewritten.buffer(), Some(&[1u8, 2][..]));

        let failed = RewriteResult::Failed {
            failures: vec![UnitFailure::new("x", FailureCause::Error("boom".into()))],
            buffer: None,
        };
        assert!(failed.is_failed());
        assert!(!failed.is_changed());
        assert_eq!(failed.failures().len(), 1);
        assert_eq!(failed.into_buffer(), None);
    }

    #[test]
    fn test_failure_into_error() {
        let err = UnitFailure::new("slow", FailureCause::Timeout(Duration::from_millis(5)))
            .into_error();
        assert!(matches!(err, Error::Timeout { ref unit, .. } if unit == "slow"));

        let err = UnitFailure::new("bad", FailureCause::Panic("oops".into())).into_error();
        assert_eq!(err.to_string(), "Transformer 'bad' failed: panic: oops");
    }
}
