//! Error types for threadctx.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Element-author failures are opaque to the engine and carried as a
//!   [`source`](std::error::Error::source) chain
//! - Restore failures are aggregated, never silently swallowed: the reverse
//!   pass always visits every remaining element before surfacing
//! - No new reporting channel: both phases surface as ordinary `Result`s
//!   through whatever failure path the surrounding runtime already uses

use crate::types::ElementKey;

/// A failure raised by a [`ContextElement`](crate::element::ContextElement)
/// implementation from `update` or `restore`.
///
/// The engine never interprets the failure; it records which element raised
/// it and propagates the chain to the scheduler.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ElementError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ElementError {
    /// Creates an element error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an element error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// A single element's restore failure, recorded during the reverse pass.
#[derive(Debug, thiserror::Error)]
#[error("element `{key}` failed to restore thread context")]
pub struct RestoreFailure {
    /// The key of the element whose `restore` failed.
    pub key: ElementKey,
    /// The failure the element raised.
    #[source]
    pub source: ElementError,
}

/// A failure of the install or uninstall phase of one resume segment.
#[derive(Debug, thiserror::Error)]
pub enum PropagationError {
    /// An element's `update` failed during the install phase.
    ///
    /// Remaining elements were not updated; elements installed earlier in
    /// the same segment were rolled back in reverse order before this error
    /// was surfaced. The resume attempt is failed and the scheduler decides
    /// the task's terminal outcome.
    #[error("element `{key}` failed to install thread context")]
    Update {
        /// The key of the element whose `update` failed.
        key: ElementKey,
        /// The failure the element raised.
        #[source]
        source: ElementError,
    },

    /// One or more elements failed to restore during the uninstall phase.
    ///
    /// The reverse pass still visited every remaining element before this
    /// error was surfaced, so one element's fault does not leave unrelated
    /// ambient state installed.
    #[error("{} element(s) failed to restore thread context", .failures.len())]
    Restore {
        /// Every failure recorded during the reverse pass, in visit order.
        failures: Vec<RestoreFailure>,
    },
}

impl PropagationError {
    /// Returns the key of the (first) failed element.
    #[must_use]
    pub fn key(&self) -> Option<ElementKey> {
        match self {
            Self::Update { key, .. } => Some(*key),
            Self::Restore { failures } => failures.first().map(|f| f.key),
        }
    }
}

/// A failure to construct or compose a [`TaskContext`](crate::context::TaskContext).
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Two elements resolved to the same key.
    ///
    /// Typically two adapters built over the same storage cell. Rejected at
    /// construction rather than deduplicated, so "last one wins" surprises
    /// cannot happen.
    #[error("duplicate context element key `{0}`")]
    DuplicateKey(ElementKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn element_error_carries_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = ElementError::with_source("cell write failed", inner);
        assert_eq!(err.to_string(), "cell write failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn update_error_reports_key() {
        let key = ElementKey::new("tag");
        let err = PropagationError::Update {
            key,
            source: ElementError::new("nope"),
        };
        assert_eq!(err.key(), Some(key));
        assert!(err.to_string().contains("install"));
    }

    #[test]
    fn restore_error_counts_failures() {
        let a = ElementKey::new("a");
        let b = ElementKey::new("b");
        let err = PropagationError::Restore {
            failures: vec![
                RestoreFailure {
                    key: a,
                    source: ElementError::new("first"),
                },
                RestoreFailure {
                    key: b,
                    source: ElementError::new("second"),
                },
            ],
        };
        assert_eq!(err.key(), Some(a));
        assert!(err.to_string().starts_with("2 element(s)"));
    }
}
