//! Arena-indexed handle tables.
//!
//! Resources that cross an API boundary (cursors, prepared statements) are
//! referenced by stable integer keys into a table of live entries, never by
//! raw pointers. Keys are never reused within one arena's lifetime, so a
//! stale handle reliably misses instead of aliasing a newer resource.

use std::collections::BTreeMap;

/// A table of live resources addressed by monotonically assigned keys.
pub struct HandleArena<T> {
    next: u64,
    entries: BTreeMap<u64, T>,
}

impl<T> HandleArena<T> {
    /// An empty arena; the first handle issued is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Insert a resource and return its handle.
    pub fn insert(&mut self, value: T) -> u64 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(handle, value);
        handle
    }

    /// Borrow the resource behind `handle`.
    pub fn get(&self, handle: u64) -> Option<&T> {
        self.entries.get(&handle)
    }

    /// Mutably borrow the resource behind `handle`.
    pub fn get_mut(&mut self, handle: u64) -> Option<&mut T> {
        self.entries.get_mut(&handle)
    }

    /// Remove and return the resource behind `handle`.
    pub fn remove(&mut self, handle: u64) -> Option<T> {
        self.entries.remove(&handle)
    }

    /// Whether `handle` is live.
    #[must_use]
    pub fn contains(&self, handle: u64) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every live entry. Handle numbering is not reset.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandleArena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleArena")
            .field("live", &self.entries.len())
            .field("next", &self.next)
            .finish()
    }
}
