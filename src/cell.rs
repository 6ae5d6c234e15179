//! Per-thread storage cells and their context-element adapter.
//!
//! A [`StorageCell`] is an explicit handle to a thread-indexed slot: each
//! worker thread observes its own value, lazily seeded from the cell's
//! default. There is no ambient global — ownership of the cell is the
//! handle, and any code holding a clone of the handle addresses the same
//! per-thread slot.
//!
//! [`StorageCell::element`] / [`StorageCell::element_with`] wrap the cell
//! into a [`ContextElement`] so a task can carry "this cell reads `v` while
//! I am running" across worker threads. The adapter's key is the identity
//! of the cell, so two adapters over the same cell collide as the same
//! context entry and are rejected at context construction.
//!
//! # Scoping
//!
//! Mutations made to the cell from inside a task body are visible only
//! until the segment's restore runs; they are not merged back into the
//! outer scope. Propagate a mutable reference type by value if in-scope
//! mutations must outlive the scope.

use crate::context::TaskContext;
use crate::element::ContextElement;
use crate::error::ElementError;
use crate::types::ElementKey;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

thread_local! {
    /// Per-thread slot storage, keyed by cell identity.
    ///
    /// Only the owning thread touches its map, so no locking is involved.
    static SLOTS: RefCell<HashMap<ElementKey, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// A handle to a per-thread storage slot.
///
/// Cloning the handle does not create a new slot: clones share the cell's
/// identity and address the same per-thread values.
#[derive(Clone)]
pub struct StorageCell<T> {
    key: ElementKey,
    default: T,
}

impl<T: Clone + Send + Sync + 'static> StorageCell<T> {
    /// Creates a cell whose slot on every thread starts as `default`.
    ///
    /// `label` is carried on the cell's key for diagnostics.
    #[must_use]
    pub fn new(label: &'static str, default: T) -> Self {
        Self {
            key: ElementKey::new(label),
            default,
        }
    }

    /// Returns the identity of this cell.
    ///
    /// All clones of the handle, and every adapter built over it, share
    /// this key.
    #[must_use]
    pub const fn key(&self) -> ElementKey {
        self.key
    }

    /// Returns the calling thread's current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.with_slot(|value| value.clone())
    }

    /// Sets the calling thread's value.
    pub fn set(&self, value: T) {
        SLOTS.with(|slots| {
            slots.borrow_mut().insert(self.key, Box::new(value));
        });
    }

    /// Sets the calling thread's value, returning the value it displaced.
    pub fn replace(&self, value: T) -> T {
        self.with_slot(|slot| std::mem::replace(slot, value))
    }

    /// Wraps this cell into a context element installing the cell's
    /// *current* value on the constructing thread.
    ///
    /// The value is captured once, here; every resume of the carrying task
    /// installs this captured value regardless of which worker thread runs
    /// the segment.
    #[must_use]
    pub fn element(&self) -> CellElement<T> {
        CellElement {
            cell: self.clone(),
            install: self.get(),
        }
    }

    /// Wraps this cell into a context element installing an explicit value.
    #[must_use]
    pub fn element_with(&self, install: T) -> CellElement<T> {
        CellElement {
            cell: self.clone(),
            install,
        }
    }

    /// Runs `f` on the calling thread's slot, seeding it from the default
    /// if this thread has never touched the cell.
    fn with_slot<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            let any = slots
                .entry(self.key)
                .or_insert_with(|| Box::new(self.default.clone()));
            match any.downcast_mut::<T>() {
                Some(value) => f(value),
                None => {
                    // Unreachable while keys stay unique per cell: only this
                    // cell writes this slot, and it only writes `T`.
                    debug_assert!(false, "slot for `{}` holds a foreign type", self.key);
                    let mut fallback = self.default.clone();
                    let out = f(&mut fallback);
                    *any = Box::new(fallback);
                    out
                }
            }
        })
    }
}

impl<T: fmt::Debug + Clone + Send + Sync + 'static> fmt::Debug for StorageCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCell")
            .field("key", &self.key)
            .field("default", &self.default)
            .finish()
    }
}

/// A [`ContextElement`] that pins a [`StorageCell`] to a captured value for
/// the duration of each resume segment.
///
/// Built by [`StorageCell::element`] or [`StorageCell::element_with`].
#[derive(Clone)]
pub struct CellElement<T> {
    cell: StorageCell<T>,
    install: T,
}

impl<T: Clone + Send + Sync + 'static> CellElement<T> {
    /// Returns the value this element installs on every resume.
    #[must_use]
    pub const fn install_value(&self) -> &T {
        &self.install
    }
}

impl<T: Clone + Send + Sync + 'static> ContextElement for CellElement<T> {
    type State = T;

    fn key(&self) -> ElementKey {
        self.cell.key
    }

    fn update(&self, _cx: &TaskContext) -> Result<T, ElementError> {
        Ok(self.cell.replace(self.install.clone()))
    }

    fn restore(&self, _cx: &TaskContext, prior: T) -> Result<(), ElementError> {
        self.cell.set(prior);
        Ok(())
    }
}

impl<T: fmt::Debug + Clone + Send + Sync + 'static> fmt::Debug for CellElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellElement")
            .field("key", &self.cell.key)
            .field("install", &self.install)
            .finish()
    }
}
