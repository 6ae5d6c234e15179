//! The context-element capability contract.
//!
//! A [`ContextElement`] is one piece of propagatable thread-affine state
//! attached to a task. The engine calls [`update`](ContextElement::update)
//! on the worker thread about to run a resume segment and
//! [`restore`](ContextElement::restore) on the same thread after the segment
//! ends, with exactly the state that segment's `update` returned.
//!
//! The state type is an associated type the engine never inspects: the
//! engine carries it erased and only the element's own `restore` (via a
//! typed downcast) interprets it.
//!
//! # Implementation Contract
//!
//! - `update` and `restore` run inline on the scheduler's resume/suspend
//!   fast path: they must not block or suspend, and should be cheap
//! - Both must touch only the calling thread's own storage; an element must
//!   tolerate concurrent `update` calls on different worker threads running
//!   different segments
//! - `update` returns the value that was in effect immediately before the
//!   call; `restore` puts exactly that value back

use crate::context::TaskContext;
use crate::error::ElementError;
use crate::types::ElementKey;
use std::any::Any;

/// A piece of thread-affine ambient state that follows a task across
/// worker threads.
///
/// Exactly one instance per [`ElementKey`] may exist in a given
/// [`TaskContext`]. The instance is created once when the task context is
/// built and is immutable thereafter; it is reused across every resume of
/// that task, including resumes on different worker threads.
pub trait ContextElement: Send + Sync + 'static {
    /// The displaced-state type returned by `update` and consumed by
    /// `restore`. Opaque to the engine.
    type State: Send + 'static;

    /// The key identifying this element's slot in a task context.
    fn key(&self) -> ElementKey;

    /// Installs this element's state on the calling worker thread.
    ///
    /// Called once per resume segment, before the task body runs. Returns
    /// the value that was in effect immediately before this call, so the
    /// matching [`restore`](Self::restore) can put it back.
    fn update(&self, cx: &TaskContext) -> Result<Self::State, ElementError>;

    /// Restores the calling worker thread's state to `prior`.
    ///
    /// Called once per resume segment, on the same thread as the matching
    /// [`update`](Self::update), after the segment suspends, fails, or
    /// completes. `prior` is exactly the value that `update` returned.
    fn restore(&self, cx: &TaskContext, prior: Self::State) -> Result<(), ElementError>;
}

/// Erased displaced state carried through the save-list.
pub(crate) type SavedState = Box<dyn Any + Send>;

/// Object-safe form of [`ContextElement`] the engine dispatches over.
pub(crate) trait ErasedElement: Send + Sync {
    fn key(&self) -> ElementKey;

    fn update_erased(&self, cx: &TaskContext) -> Result<SavedState, ElementError>;

    fn restore_erased(&self, cx: &TaskContext, prior: SavedState) -> Result<(), ElementError>;
}

impl<E: ContextElement> ErasedElement for E {
    fn key(&self) -> ElementKey {
        ContextElement::key(self)
    }

    fn update_erased(&self, cx: &TaskContext) -> Result<SavedState, ElementError> {
        let state = self.update(cx)?;
        Ok(Box::new(state))
    }

    fn restore_erased(&self, cx: &TaskContext, prior: SavedState) -> Result<(), ElementError> {
        match prior.downcast::<E::State>() {
            Ok(state) => self.restore(cx, *state),
            Err(_) => {
                // Pairing violation: the saved state was not produced by this
                // element's own update in the same segment.
                debug_assert!(
                    false,
                    "restore for element `{}` received foreign saved state",
                    ContextElement::key(self),
                );
                Err(ElementError::new(format!(
                    "saved state does not belong to element `{}`",
                    ContextElement::key(self),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter {
        key: ElementKey,
        installs: AtomicU32,
    }

    impl ContextElement for Counter {
        type State = u32;

        fn key(&self) -> ElementKey {
            self.key
        }

        fn update(&self, _cx: &TaskContext) -> Result<u32, ElementError> {
            Ok(self.installs.fetch_add(1, Ordering::Relaxed))
        }

        fn restore(&self, _cx: &TaskContext, _prior: u32) -> Result<(), ElementError> {
            Ok(())
        }
    }

    #[test]
    fn erased_roundtrip_preserves_state() {
        init_test_logging();
        let element = Counter {
            key: ElementKey::new("counter"),
            installs: AtomicU32::new(7),
        };
        let cx = TaskContext::empty();

        let saved = element.update_erased(&cx).unwrap();
        assert_eq!(*saved.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "foreign saved state"))]
    fn foreign_state_is_a_pairing_violation() {
        init_test_logging();
        let element = Counter {
            key: ElementKey::new("counter"),
            installs: AtomicU32::new(0),
        };
        let cx = TaskContext::empty();

        let foreign: SavedState = Box::new("not a u32");
        let result = element.restore_erased(&cx, foreign);
        // Release builds surface the mismatch as an element error instead
        // of asserting.
        assert!(result.is_err());
    }
}
