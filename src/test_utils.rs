//! Test utilities for threadctx.
//!
//! This module provides shared helpers for unit and conformance tests:
//! - Consistent tracing-based logging initialization
//! - A sequence log shared between test elements
//! - Recording and failing [`ContextElement`] implementations
//!
//! # Example
//! ```
//! use threadctx::test_utils::{init_test_logging, RecordingElement, SharedLog};
//! use threadctx::TaskContext;
//!
//! init_test_logging();
//! let log = SharedLog::default();
//! let cx = TaskContext::builder()
//!     .attach(RecordingElement::new("tag", &log))
//!     .unwrap()
//!     .build();
//! let saved = cx.update_thread_context().unwrap();
//! saved.restore(&cx).unwrap();
//! assert_eq!(log.entries(), vec!["update tag", "restore tag"]);
//! ```

use crate::context::TaskContext;
use crate::element::ContextElement;
use crate::error::ElementError;
use crate::types::ElementKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT_LOGGING: Once = Once::new();

/// Global sequence counter shared by the recording elements.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace")),
            )
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// An append-only event log shared between test elements and assertions.
///
/// Clones share the same underlying log.
#[derive(Debug, Default, Clone)]
pub struct SharedLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl SharedLog {
    /// Appends one entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .expect("test log poisoned")
            .push(entry.into());
    }

    /// Returns a snapshot of all entries in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("test log poisoned").clone()
    }
}

/// A context element that records its update/restore calls.
///
/// `update` draws a fresh global sequence number and returns it as the
/// displaced state, so tests can assert both call order (via the log) and
/// that `restore` received exactly the value its paired `update` returned.
#[derive(Debug)]
pub struct RecordingElement {
    name: &'static str,
    key: ElementKey,
    log: SharedLog,
}

impl RecordingElement {
    /// Creates a recording element with a fresh key.
    #[must_use]
    pub fn new(name: &'static str, log: &SharedLog) -> Self {
        Self {
            name,
            key: ElementKey::new(name),
            log: log.clone(),
        }
    }
}

impl ContextElement for RecordingElement {
    type State = u64;

    fn key(&self) -> ElementKey {
        self.key
    }

    fn update(&self, _cx: &TaskContext) -> Result<u64, ElementError> {
        self.log.push(format!("update {}", self.name));
        Ok(SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }

    fn restore(&self, _cx: &TaskContext, _prior: u64) -> Result<(), ElementError> {
        self.log.push(format!("restore {}", self.name));
        Ok(())
    }
}

/// Which phase of a [`FailingElement`] raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePhase {
    Update,
    Restore,
}

/// A context element that fails in a chosen phase, recording its calls.
#[derive(Debug)]
pub struct FailingElement {
    name: &'static str,
    key: ElementKey,
    log: SharedLog,
    phase: FailurePhase,
}

impl FailingElement {
    /// Creates an element whose `update` always fails.
    #[must_use]
    pub fn failing_update(name: &'static str, log: &SharedLog) -> Self {
        Self {
            name,
            key: ElementKey::new(name),
            log: log.clone(),
            phase: FailurePhase::Update,
        }
    }

    /// Creates an element whose `restore` always fails.
    #[must_use]
    pub fn failing_restore(name: &'static str, log: &SharedLog) -> Self {
        Self {
            name,
            key: ElementKey::new(name),
            log: log.clone(),
            phase: FailurePhase::Restore,
        }
    }
}

impl ContextElement for FailingElement {
    type State = u64;

    fn key(&self) -> ElementKey {
        self.key
    }

    fn update(&self, _cx: &TaskContext) -> Result<u64, ElementError> {
        if self.phase == FailurePhase::Update {
            self.log.push(format!("update {} (failed)", self.name));
            return Err(ElementError::new(format!("{} refused to install", self.name)));
        }
        self.log.push(format!("update {}", self.name));
        Ok(SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }

    fn restore(&self, _cx: &TaskContext, _prior: u64) -> Result<(), ElementError> {
        if self.phase == FailurePhase::Restore {
            self.log.push(format!("restore {} (failed)", self.name));
            return Err(ElementError::new(format!("{} refused to restore", self.name)));
        }
        self.log.push(format!("restore {}", self.name));
        Ok(())
    }
}
