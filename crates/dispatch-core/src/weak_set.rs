#![forbid(unsafe_code)]

//! A set of callbacks that does not extend the lifetime of their owners.
//!
//! # Design
//!
//! Entries are kept in a `Vec` in insertion order, keyed by
//! [`CallbackKey`]. Dead entries (owner dropped, guard dropped) are never
//! yielded and are pruned lazily whenever [`live_callbacks`] runs.
//!
//! # Ordering
//!
//! Iteration happens to follow insertion order, but that is **not** part of
//! the contract. Callers and tests must not rely on it beyond a single
//! deterministic, single-threaded scenario.
//!
//! # Re-entrancy
//!
//! [`live_callbacks`] returns a point-in-time snapshot of strong handles.
//! Adding or removing entries while that snapshot is being invoked mutates
//! only the backing `Vec`, so iteration can never be corrupted.
//!
//! [`live_callbacks`]: WeakCallbackSet::live_callbacks

use crate::callback::{Callback, CallbackKey, LiveCallback, OwnerId};

/// Weakly-held callbacks keyed by identity.
#[derive(Default)]
pub struct WeakCallbackSet {
    entries: Vec<Callback>,
}

impl WeakCallbackSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback. Re-adding a live callback with the same key is a
    /// no-op; a dead entry under the same key (address reuse) is replaced.
    ///
    /// Returns `true` if a new entry was stored.
    pub fn add(&mut self, callback: Callback) -> bool {
        let key = callback.key();
        match self.entries.iter_mut().find(|c| c.key() == key) {
            Some(existing) if existing.is_alive() => false,
            Some(existing) => {
                *existing = callback;
                true
            }
            None => {
                self.entries.push(callback);
                true
            }
        }
    }

    /// Remove the entry with this key, if present.
    pub fn remove(&mut self, key: &CallbackKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|c| c.key() != *key);
        self.entries.len() != before
    }

    /// Remove every entry bound to `owner`. Returns how many were removed.
    pub fn remove_owner(&mut self, owner: OwnerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| c.owner() != Some(owner));
        before - self.entries.len()
    }

    /// Whether a live entry with this key exists.
    #[must_use]
    pub fn contains(&self, key: &CallbackKey) -> bool {
        self.entries
            .iter()
            .any(|c| c.key() == *key && c.is_alive())
    }

    /// Number of live entries (dead ones are not counted, nor pruned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|c| c.is_alive()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop dead entries. Returns how many were pruned.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(Callback::is_alive);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::trace!(pruned, "pruned dead callbacks");
        }
        pruned
    }

    /// Snapshot of currently resolvable callbacks; prunes dead entries.
    ///
    /// Each call produces a fresh snapshot.
    pub fn live_callbacks(&mut self) -> Vec<LiveCallback> {
        self.prune();
        self.entries.iter().filter_map(Callback::resolve).collect()
    }

    /// Consume the set, keeping only live callbacks.
    #[must_use]
    pub fn into_callbacks(self) -> Vec<Callback> {
        self.entries.into_iter().filter(Callback::is_alive).collect()
    }
}

impl std::fmt::Debug for WeakCallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakCallbackSet")
            .field("entries", &self.entries.len())
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission::Emission;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Listener {
        hits: Cell<u32>,
    }

    impl Listener {
        fn new() -> Rc<Self> {
            Rc::new(Self { hits: Cell::new(0) })
        }

        fn on_a(&self, _e: &Emission) {
            self.hits.set(self.hits.get() + 1);
        }

        fn on_b(&self, _e: &Emission) {
            self.hits.set(self.hits.get() + 10);
        }
    }

    fn invoke_all(set: &mut WeakCallbackSet) {
        for cb in set.live_callbacks() {
            cb.invoke(&Emission::new()).unwrap();
        }
    }

    #[test]
    fn add_is_idempotent() {
        let l = Listener::new();
        let mut set = WeakCallbackSet::new();
        assert!(set.add(Callback::method(&l, Listener::on_a)));
        assert!(!set.add(Callback::method(&l, Listener::on_a)));
        assert_eq!(set.len(), 1);
        invoke_all(&mut set);
        assert_eq!(l.hits.get(), 1);
    }

    #[test]
    fn remove_single_and_by_owner() {
        let l = Listener::new();
        let other = Listener::new();
        let mut set = WeakCallbackSet::new();
        set.add(Callback::method(&l, Listener::on_a));
        set.add(Callback::method(&l, Listener::on_b));
        set.add(Callback::method(&other, Listener::on_a));

        assert!(set.remove(&Callback::method(&l, Listener::on_a).key()));
        assert!(!set.remove(&Callback::method(&l, Listener::on_a).key()));
        assert_eq!(set.len(), 2);

        assert_eq!(set.remove_owner(OwnerId::of(&l)), 1);
        assert_eq!(set.len(), 1);
        invoke_all(&mut set);
        assert_eq!(other.hits.get(), 1);
        assert_eq!(l.hits.get(), 0);
    }

    #[test]
    fn dead_owners_are_skipped_and_pruned() {
        let l = Listener::new();
        let mut set = WeakCallbackSet::new();
        set.add(Callback::method(&l, Listener::on_a));
        drop(l);
        assert_eq!(set.len(), 0);
        assert!(set.live_callbacks().is_empty());
        assert_eq!(set.entries.len(), 0);
    }

    #[test]
    fn snapshot_survives_mutation() {
        let l = Listener::new();
        let mut set = WeakCallbackSet::new();
        set.add(Callback::method(&l, Listener::on_a));
        let snapshot = set.live_callbacks();
        set.remove_owner(OwnerId::of(&l));
        set.add(Callback::method(&l, Listener::on_b));
        assert_eq!(snapshot.len(), 1);
        snapshot[0].invoke(&Emission::new()).unwrap();
        assert_eq!(l.hits.get(), 1);
    }

    #[test]
    fn into_callbacks_drops_dead() {
        let keep = Listener::new();
        let gone = Listener::new();
        let mut set = WeakCallbackSet::new();
        set.add(Callback::method(&keep, Listener::on_a));
        set.add(Callback::method(&gone, Listener::on_a));
        drop(gone);
        assert_eq!(set.into_callbacks().len(), 1);
    }
}
