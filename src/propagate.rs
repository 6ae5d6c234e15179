//! The install/uninstall engine for one resume segment.
//!
//! The scheduler brackets every resume attempt of a task with two hooks:
//!
//! ```text
//! update_thread_context() ──► SavedContext          (before the body runs)
//!          │                       │
//!     task body runs          held on the worker thread's stack
//!          │                       │
//!          └──► SavedContext::restore()             (after every exit path)
//! ```
//!
//! [`TaskContext::update_thread_context`] enumerates the task's elements in
//! context order, calls `update` on each, and records the displaced values.
//! [`SavedContext::restore`] replays them in reverse. The restore hook must
//! run on every exit path of the segment — completion, suspension, failure,
//! cancellation — before the thread is handed back to the scheduler;
//! [`TaskContext::scoped`] packages that guarantee for closure-shaped
//! segments via a drop guard.
//!
//! # Fast Paths
//!
//! Most tasks carry zero or one element. Zero elements record a no-op
//! marker; one element holds its single saved pair inline. Only two or more
//! elements allocate a save-list.
//!
//! # Failure Policy
//!
//! If an element's `update` fails, no further element is updated, the
//! already-installed elements are rolled back in reverse order (best
//! effort; rollback failures are logged, not surfaced), and the install
//! error propagates — the resume attempt is failed. If an element's
//! `restore` fails, the reverse pass still visits every remaining element
//! so one element's fault does not leave unrelated ambient state installed;
//! all failures are aggregated into the returned error.

use crate::context::TaskContext;
use crate::element::{ErasedElement, SavedState};
use crate::error::{PropagationError, RestoreFailure};
use crate::types::ElementKey;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{error, trace};

/// One (element, displaced state) pair recorded during install.
struct SavedEntry {
    element: Arc<dyn ErasedElement>,
    prior: SavedState,
}

impl SavedEntry {
    /// Attempts this entry's restore, consuming the pairing either way.
    fn restore(self, cx: &TaskContext) -> Result<(), RestoreFailure> {
        let key = self.element.key();
        pairing::mark_restored(key);
        self.element
            .restore_erased(cx, self.prior)
            .map_err(|source| RestoreFailure { key, source })
    }
}

enum SavedRepr {
    /// No elements were attached; nothing to restore.
    Empty,
    /// Single-element fast path: the pair is held inline.
    Single(SavedEntry),
    /// General path for two or more elements, in install order.
    Many(Vec<SavedEntry>),
}

/// Which representation a [`SavedContext`] took.
///
/// Exposed so tests and instrumentation can verify that the fast paths are
/// actually taken; schedulers have no reason to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SavedContextKind {
    /// No elements; no allocation, restore is a no-op.
    Empty,
    /// One element; the saved pair is held inline, no list allocation.
    Single,
    /// Two or more elements; an ordered save-list was allocated.
    Many,
}

/// The displaced thread state of one resume segment.
///
/// Produced by [`TaskContext::update_thread_context`] on the worker thread
/// about to run the segment and consumed by [`restore`](Self::restore) on
/// the same thread after the segment ends. It is deliberately neither
/// `Send` nor `Sync`: the save-list belongs to the call stack of the
/// segment and must never migrate to another thread.
pub struct SavedContext {
    repr: SavedRepr,
    /// Pins the saved state to the installing thread.
    _confined: PhantomData<*const ()>,
}

impl SavedContext {
    const fn from_repr(repr: SavedRepr) -> Self {
        Self {
            repr,
            _confined: PhantomData,
        }
    }

    /// Returns which representation this saved context took.
    #[must_use]
    pub const fn kind(&self) -> SavedContextKind {
        match self.repr {
            SavedRepr::Empty => SavedContextKind::Empty,
            SavedRepr::Single(_) => SavedContextKind::Single,
            SavedRepr::Many(_) => SavedContextKind::Many,
        }
    }

    /// Returns the number of (element, prior state) pairs recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.repr {
            SavedRepr::Empty => 0,
            SavedRepr::Single(_) => 1,
            SavedRepr::Many(entries) => entries.len(),
        }
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.repr, SavedRepr::Empty)
    }

    /// Uninstalls the segment's thread context, in reverse install order.
    ///
    /// Must be called on the thread that produced this value, after the
    /// segment suspends, fails, or completes — on every exit path. Each
    /// element's `restore` receives exactly the state its own `update`
    /// returned.
    ///
    /// Every remaining element is attempted even after a failure; failures
    /// are aggregated into [`PropagationError::Restore`].
    pub fn restore(self, cx: &TaskContext) -> Result<(), PropagationError> {
        match self.repr {
            SavedRepr::Empty => Ok(()),
            SavedRepr::Single(entry) => {
                let key = entry.element.key();
                trace!(key = %key, "restoring thread context");
                entry
                    .restore(cx)
                    .map_err(|failure| PropagationError::Restore {
                        failures: vec![failure],
                    })
            }
            SavedRepr::Many(entries) => {
                trace!(elements = entries.len(), "restoring thread context");
                let mut failures = Vec::new();
                for entry in entries.into_iter().rev() {
                    if let Err(failure) = entry.restore(cx) {
                        error!(
                            key = %failure.key,
                            error = %failure.source,
                            "element failed to restore thread context; continuing reverse pass",
                        );
                        failures.push(failure);
                    }
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(PropagationError::Restore { failures })
                }
            }
        }
    }
}

impl fmt::Debug for SavedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedContext")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

impl TaskContext {
    /// Installs this context's elements on the calling worker thread.
    ///
    /// Called by the scheduler before a resume segment runs. Elements are
    /// updated in context order; the returned [`SavedContext`] must be fed
    /// to [`SavedContext::restore`] on the same thread once the segment
    /// ends, on every exit path.
    ///
    /// On an element failure the already-installed elements of this segment
    /// are rolled back in reverse order before the error is returned, and
    /// the resume attempt must be treated as failed.
    pub fn update_thread_context(&self) -> Result<SavedContext, PropagationError> {
        match self.elements() {
            [] => Ok(SavedContext::from_repr(SavedRepr::Empty)),
            [only] => {
                let entry = install(only, self).map_err(|err| {
                    trace!(key = %only.key(), "thread context install failed");
                    err
                })?;
                Ok(SavedContext::from_repr(SavedRepr::Single(entry)))
            }
            elements => {
                trace!(elements = elements.len(), "installing thread context");
                let mut saved: Vec<SavedEntry> = Vec::with_capacity(elements.len());
                for element in elements {
                    match install(element, self) {
                        Ok(entry) => saved.push(entry),
                        Err(err) => {
                            roll_back(saved, self);
                            return Err(err);
                        }
                    }
                }
                Ok(SavedContext::from_repr(SavedRepr::Many(saved)))
            }
        }
    }

    /// Runs `f` with this context installed on the calling thread.
    ///
    /// The segment here is the closure body: the context is installed
    /// before `f` runs and restored on every exit path, including unwinds.
    /// Restore failures on the unwind path are logged rather than surfaced
    /// (the panic stays the primary failure); on the normal path they are
    /// returned.
    pub fn scoped<R>(&self, f: impl FnOnce() -> R) -> Result<R, PropagationError> {
        let saved = self.update_thread_context()?;
        let mut guard = RestoreGuard {
            cx: self,
            saved: Some(saved),
        };
        let out = f();
        if let Some(saved) = guard.saved.take() {
            saved.restore(self)?;
        }
        Ok(out)
    }
}

/// Updates one element and records the pairing.
fn install(
    element: &Arc<dyn ErasedElement>,
    cx: &TaskContext,
) -> Result<SavedEntry, PropagationError> {
    let key = element.key();
    pairing::mark_updated(key);
    match element.update_erased(cx) {
        Ok(prior) => Ok(SavedEntry {
            element: Arc::clone(element),
            prior,
        }),
        Err(source) => {
            // The element never completed its update; there is nothing of
            // its own to restore.
            pairing::mark_restored(key);
            Err(PropagationError::Update { key, source })
        }
    }
}

/// Rolls back a partially installed segment in reverse order.
///
/// Best effort: a rollback failure is logged and the pass continues, so the
/// original install error stays the one the scheduler sees.
fn roll_back(saved: Vec<SavedEntry>, cx: &TaskContext) {
    for entry in saved.into_iter().rev() {
        if let Err(failure) = entry.restore(cx) {
            error!(
                key = %failure.key,
                error = %failure.source,
                "rollback after failed install could not restore element",
            );
        }
    }
}

/// Restores the thread context when a scoped segment unwinds.
struct RestoreGuard<'a> {
    cx: &'a TaskContext,
    saved: Option<SavedContext>,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = saved.restore(self.cx) {
                error!(error = %err, "thread context restore failed during unwind");
            }
        }
    }
}

/// Debug-build pairing assertions.
///
/// Tracks, per thread, the stack of unrestored `update` calls. Restores
/// must pair LIFO with updates: within one segment the reverse pass keeps
/// the discipline by construction, and nested scoped segments (which may
/// legitimately reinstall a key the outer segment installed) nest like
/// lexical scopes. A restore that does not pair with the most recent
/// unrestored update is a programmer error and fails fast under
/// `debug_assertions`. Release builds skip the bookkeeping entirely; the
/// pairing is unchecked there.
mod pairing {
    use super::ElementKey;

    #[cfg(debug_assertions)]
    use std::cell::RefCell;

    #[cfg(debug_assertions)]
    thread_local! {
        static UNRESTORED: RefCell<Vec<ElementKey>> = const { RefCell::new(Vec::new()) };
    }

    #[cfg(debug_assertions)]
    pub(super) fn mark_updated(key: ElementKey) {
        UNRESTORED.with(|stack| stack.borrow_mut().push(key));
    }

    #[cfg(debug_assertions)]
    pub(super) fn mark_restored(key: ElementKey) {
        UNRESTORED.with(|stack| {
            let top = stack.borrow_mut().pop();
            debug_assert!(
                top == Some(key),
                "restore for `{key}` does not pair with this thread's most recent \
                 unrestored update ({top:?})",
            );
        });
    }

    #[cfg(not(debug_assertions))]
    pub(super) fn mark_updated(_key: ElementKey) {}

    #[cfg(not(debug_assertions))]
    pub(super) fn mark_restored(_key: ElementKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::StorageCell;
    use crate::test_utils::{init_test_logging, FailingElement, RecordingElement, SharedLog};

    #[test]
    fn empty_context_records_a_marker() {
        init_test_logging();
        let cx = TaskContext::empty();
        let saved = cx.update_thread_context().unwrap();
        assert_eq!(saved.kind(), SavedContextKind::Empty);
        assert!(saved.is_empty());
        saved.restore(&cx).unwrap();
    }

    #[test]
    fn single_element_takes_the_inline_path() {
        init_test_logging();
        let cell = StorageCell::new("only", 1u32);
        let cx = TaskContext::builder()
            .attach(cell.element_with(2))
            .unwrap()
            .build();

        let saved = cx.update_thread_context().unwrap();
        assert_eq!(saved.kind(), SavedContextKind::Single);
        assert_eq!(saved.len(), 1);
        assert_eq!(cell.get(), 2);
        saved.restore(&cx).unwrap();
        assert_eq!(cell.get(), 1);
    }

    #[test]
    fn restore_order_reverses_update_order() {
        init_test_logging();
        let log = SharedLog::default();
        let cx = TaskContext::builder()
            .attach(RecordingElement::new("a", &log))
            .unwrap()
            .attach(RecordingElement::new("b", &log))
            .unwrap()
            .attach(RecordingElement::new("c", &log))
            .unwrap()
            .build();

        let saved = cx.update_thread_context().unwrap();
        assert_eq!(saved.kind(), SavedContextKind::Many);
        saved.restore(&cx).unwrap();

        assert_eq!(
            log.entries(),
            vec![
                "update a", "update b", "update c", "restore c", "restore b", "restore a",
            ],
        );
    }

    #[test]
    fn update_failure_rolls_back_and_stops() {
        init_test_logging();
        let log = SharedLog::default();
        let cx = TaskContext::builder()
            .attach(RecordingElement::new("a", &log))
            .unwrap()
            .attach(RecordingElement::new("b", &log))
            .unwrap()
            .attach(FailingElement::failing_update("c", &log))
            .unwrap()
            .attach(RecordingElement::new("d", &log))
            .unwrap()
            .build();

        let err = cx.update_thread_context().unwrap_err();
        assert!(matches!(err, PropagationError::Update { .. }));

        // The fourth element is never updated, the failed element is never
        // restored, and the first two are rolled back in reverse order.
        assert_eq!(
            log.entries(),
            vec!["update a", "update b", "update c (failed)", "restore b", "restore a"],
        );
    }

    #[test]
    fn restore_failure_does_not_stop_the_reverse_pass() {
        init_test_logging();
        let log = SharedLog::default();
        let cx = TaskContext::builder()
            .attach(RecordingElement::new("a", &log))
            .unwrap()
            .attach(RecordingElement::new("b", &log))
            .unwrap()
            .attach(FailingElement::failing_restore("c", &log))
            .unwrap()
            .build();

        let saved = cx.update_thread_context().unwrap();
        let err = saved.restore(&cx).unwrap_err();
        let PropagationError::Restore { failures } = err else {
            panic!("expected restore failure");
        };
        assert_eq!(failures.len(), 1);

        // `c` is visited first in the reverse pass and fails; the remaining
        // two are still restored.
        assert_eq!(
            log.entries(),
            vec![
                "update a",
                "update b",
                "update c",
                "restore c (failed)",
                "restore b",
                "restore a",
            ],
        );
    }

    #[test]
    fn scoped_restores_on_the_normal_path() {
        init_test_logging();
        let cell = StorageCell::new("tag", "outer".to_string());
        let cx = TaskContext::builder()
            .attach(cell.element_with("inner".to_string()))
            .unwrap()
            .build();

        let observed = cx.scoped(|| cell.get()).unwrap();
        assert_eq!(observed, "inner");
        assert_eq!(cell.get(), "outer");
    }

    #[test]
    fn scoped_restores_on_unwind() {
        init_test_logging();
        let cell = StorageCell::new("tag", 1u32);
        let cx = TaskContext::builder()
            .attach(cell.element_with(2))
            .unwrap()
            .build();

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cx.scoped(|| panic!("task body failed"));
        }));
        assert!(panicked.is_err());
        assert_eq!(cell.get(), 1, "unwind path must still restore");
    }

    #[test]
    fn saved_state_matches_the_paired_update() {
        init_test_logging();
        let cell = StorageCell::new("x", 0u32);
        let cx = TaskContext::builder()
            .attach(cell.element_with(5))
            .unwrap()
            .build();

        cell.set(33);
        let saved = cx.update_thread_context().unwrap();
        // Mutate inside the "body"; restore must use the displaced 33, not
        // the current value.
        cell.set(77);
        saved.restore(&cx).unwrap();
        assert_eq!(cell.get(), 33);
    }
}
