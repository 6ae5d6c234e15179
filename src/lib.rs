//! Threadctx: thread-context propagation for cooperative task runtimes.
//!
//! # Overview
//!
//! A cooperatively scheduled task may suspend on one worker thread and resume
//! on another, yet code inside the task expects thread-affine ambient state
//! (a logging tag, a security principal, a thread-name decoration) to follow
//! the task rather than the thread. Threadctx provides the propagation
//! mechanism: each piece of state is a [`ContextElement`] attached to the
//! task's [`TaskContext`], and the scheduler brackets every resume segment
//! with an install/uninstall pair that keeps the worker thread's ambient
//! state consistent with the task currently running on it.
//!
//! # Core Guarantees
//!
//! - **Strict pairing**: every `update` during a resume segment has exactly
//!   one matching `restore` on the same thread before that thread runs
//!   another segment, on every exit path (completion, suspension, failure,
//!   cancellation)
//! - **Reversible ordering**: elements are restored in the exact reverse of
//!   install order, so later elements may depend on state installed by
//!   earlier ones
//! - **Lock-free**: `update` and `restore` touch only the calling thread's
//!   own storage; the engine holds no synchronization primitives
//! - **Allocation-free fast path**: tasks carrying zero or one element never
//!   allocate a save-list
//!
//! # Module Structure
//!
//! - [`types`]: Identifier types ([`ElementKey`])
//! - [`error`]: Error types for context construction and propagation failures
//! - [`context`]: The immutable, keyed [`TaskContext`] container
//! - [`element`]: The [`ContextElement`] capability contract
//! - [`cell`]: [`StorageCell`] per-thread slots and their context adapter
//! - [`propagate`]: The install/uninstall engine and [`SavedContext`]
//! - [`test_utils`]: Shared helpers for unit and conformance tests
//!
//! # Scheduler Integration
//!
//! ```
//! use threadctx::{StorageCell, TaskContext};
//!
//! let cell = StorageCell::new("request-id", 0u64);
//! let cx = TaskContext::builder()
//!     .attach(cell.element_with(42))
//!     .unwrap()
//!     .build();
//!
//! // Before running a resume segment on this worker thread:
//! let saved = cx.update_thread_context().unwrap();
//! assert_eq!(cell.get(), 42);
//!
//! // ... task body runs until it suspends, fails, or completes ...
//!
//! // After the segment, unconditionally:
//! saved.restore(&cx).unwrap();
//! assert_eq!(cell.get(), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
pub mod context;
pub mod element;
pub mod error;
pub mod propagate;
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use cell::{CellElement, StorageCell};
pub use context::{TaskContext, TaskContextBuilder};
pub use element::ContextElement;
pub use error::{ContextError, ElementError, PropagationError, RestoreFailure};
pub use propagate::{SavedContext, SavedContextKind};
pub use types::ElementKey;
