//! The task-context container.
//!
//! A [`TaskContext`] is the immutable, keyed, insertion-ordered collection
//! of [`ContextElement`]s attached to one task. It is built once when the
//! task is constructed and reused across every resume of that task; clones
//! share the element list.
//!
//! Two elements resolving to the same key (typically two adapters over the
//! same storage cell) are rejected at construction rather than deduplicated,
//! so composition never silently drops a provider.

use crate::element::{ContextElement, ErasedElement};
use crate::error::ContextError;
use crate::types::ElementKey;
use std::fmt;
use std::sync::Arc;

/// The immutable set of context elements attached to a task.
///
/// Iteration order is insertion order and is stable across resumes; the
/// propagation engine installs elements in this order and restores them in
/// reverse.
///
/// # Cloning
///
/// `TaskContext` is cheaply clonable (it wraps an `Arc`); clones share the
/// same elements. The scheduler typically stores one clone in the task
/// record and passes references into the propagation hooks.
#[derive(Clone)]
pub struct TaskContext {
    elements: Arc<[Arc<dyn ErasedElement>]>,
}

impl TaskContext {
    /// Returns a context carrying no elements.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            elements: Arc::from(Vec::new()),
        }
    }

    /// Starts building a context.
    #[must_use]
    pub fn builder() -> TaskContextBuilder {
        TaskContextBuilder {
            elements: Vec::new(),
        }
    }

    /// Returns the number of elements attached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if no elements are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns true if an element with `key` is attached.
    #[must_use]
    pub fn contains(&self, key: ElementKey) -> bool {
        self.elements.iter().any(|e| e.key() == key)
    }

    /// Returns the keys of the attached elements, in installation order.
    pub fn keys(&self) -> impl Iterator<Item = ElementKey> + '_ {
        self.elements.iter().map(|e| e.key())
    }

    /// Composes two contexts into a new one.
    ///
    /// Elements of `self` come first, then elements of `other`. Fails with
    /// [`ContextError::DuplicateKey`] if the two contexts share a key.
    pub fn join(&self, other: &Self) -> Result<Self, ContextError> {
        let mut elements: Vec<Arc<dyn ErasedElement>> =
            Vec::with_capacity(self.elements.len() + other.elements.len());
        elements.extend(self.elements.iter().cloned());
        for element in other.elements.iter() {
            let key = element.key();
            if elements.iter().any(|e| e.key() == key) {
                return Err(ContextError::DuplicateKey(key));
            }
            elements.push(Arc::clone(element));
        }
        Ok(Self {
            elements: Arc::from(elements),
        })
    }

    pub(crate) fn elements(&self) -> &[Arc<dyn ErasedElement>] {
        &self.elements
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.elements.iter().map(|e| e.key()))
            .finish()
    }
}

/// Builder for [`TaskContext`].
///
/// Elements are installed in attach order.
pub struct TaskContextBuilder {
    elements: Vec<Arc<dyn ErasedElement>>,
}

impl TaskContextBuilder {
    /// Attaches an element.
    ///
    /// Fails with [`ContextError::DuplicateKey`] if an element with the same
    /// key is already attached.
    pub fn attach<E: ContextElement>(mut self, element: E) -> Result<Self, ContextError> {
        let key = ContextElement::key(&element);
        if self.elements.iter().any(|e| e.key() == key) {
            return Err(ContextError::DuplicateKey(key));
        }
        self.elements.push(Arc::new(element));
        Ok(self)
    }

    /// Finishes the context.
    #[must_use]
    pub fn build(self) -> TaskContext {
        TaskContext {
            elements: Arc::from(self.elements),
        }
    }
}

impl fmt::Debug for TaskContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.elements.iter().map(|e| e.key()))
            .finish()
    }
}
