//! Thread-safe insertion-ordered set.
//!
//! A small wrapper used for membership bookkeeping (e.g. live worker
//! identifiers). Enumeration yields elements in insertion order; removal
//! preserves the relative order of the remaining elements.

use indexmap::IndexSet;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;

/// A thread-safe set that remembers insertion order.
pub struct ConcurrentSet<T> {
    inner: RwLock<IndexSet<T>>,
}

impl<T: Eq + Hash + Clone> ConcurrentSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexSet::new()),
        }
    }

    /// Adds `item`; returns `true` if it was not already present.
    pub fn add(&self, item: T) -> bool {
        self.inner.write().insert(item)
    }

    /// Removes `item`; returns `true` if it was present.
    ///
    /// Remaining elements keep their insertion order.
    pub fn remove(&self, item: &T) -> bool {
        self.inner.write().shift_remove(item)
    }

    /// Returns whether `item` is present.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.inner.read().contains(item)
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Returns the elements in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.read().iter().cloned().collect()
    }
}

impl<T: Eq + Hash + Clone> Default for ConcurrentSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Construction from an initial sequence deduplicates, keeping the first
/// occurrence's position.
impl<T: Eq + Hash + Clone> FromIterator<T> for ConcurrentSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            inner: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for ConcurrentSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.read().iter()).finish()
    }
}
