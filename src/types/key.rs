//! Identifier types for context elements.
//!
//! An [`ElementKey`] identifies one element slot in a task context. Keys are
//! allocated from a process-wide counter, so two keys are equal only if they
//! were allocated by the same call (or copied from it). A storage cell
//! allocates its key once at construction and hands copies to every adapter
//! built over it, which is what makes two adapters over the same cell
//! collide as a single context entry.

use core::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a context-element slot.
///
/// Equality and hashing use only the allocation id; the label exists for
/// diagnostics and carries no identity.
#[derive(Clone, Copy)]
pub struct ElementKey {
    id: u64,
    label: &'static str,
}

impl ElementKey {
    /// Allocates a fresh key with a diagnostic label.
    ///
    /// Every call returns a key distinct from all previously allocated keys.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        let id = KEY_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self { id, label }
    }

    /// Returns the diagnostic label this key was allocated with.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl PartialEq for ElementKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ElementKey {}

impl Hash for ElementKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementKey({}:{})", self.label, self.id)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let a = ElementKey::new("tag");
        let b = ElementKey::new("tag");
        assert_ne!(a, b, "same label must not imply same key");
        assert_eq!(a, a);
    }

    #[test]
    fn copies_are_equal() {
        let a = ElementKey::new("cell");
        let b = a;
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn display_uses_label() {
        let key = ElementKey::new("principal");
        assert!(key.to_string().starts_with("principal#"));
        assert_eq!(key.label(), "principal");
    }
}
