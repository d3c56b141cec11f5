#![forbid(unsafe_code)]

//! Emission lock state: coalesce a burst of dispatches into one.
//!
//! # Invariants
//!
//! 1. Each [`ContextId`] holds the lock with a nesting depth; only the
//!    outermost release for a context removes it.
//! 2. While any context holds the lock, dispatches are recorded into a
//!    single pending slot (last write wins across contexts).
//! 3. The pending slot is cleared when the lock goes from free to held.
//! 4. When the last holder releases, the pending emission (if any) is
//!    handed back exactly once for replay.
//!
//! The scoped guard lives in [`crate::channel::EmissionGuard`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::emission::Emission;

/// Identifies an execution context holding an emission lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// The default, synchronous context.
    pub const MAIN: Self = Self(0);

    /// Allocate a fresh, process-unique context id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::MAIN
    }
}

/// Re-entrant, multi-context hold lock with a single pending slot.
#[derive(Debug, Default)]
pub struct EmissionLock {
    holders: Vec<(ContextId, usize)>,
    pending: Option<Emission>,
}

impl EmissionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Held by any context.
    #[must_use]
    pub fn is_held(&self) -> bool {
        !self.holders.is_empty()
    }

    #[must_use]
    pub fn is_held_by(&self, context: ContextId) -> bool {
        self.holders.iter().any(|(c, _)| *c == context)
    }

    /// Nesting depth for `context` (0 when not held).
    #[must_use]
    pub fn depth(&self, context: ContextId) -> usize {
        self.holders
            .iter()
            .find(|(c, _)| *c == context)
            .map_or(0, |(_, d)| *d)
    }

    /// Acquire for `context`. Returns `true` on the context's first
    /// (outermost) acquire, `false` for a nested one.
    pub fn acquire(&mut self, context: ContextId) -> bool {
        if let Some((_, depth)) = self.holders.iter_mut().find(|(c, _)| *c == context) {
            *depth += 1;
            return false;
        }
        if self.holders.is_empty() {
            self.pending = None;
        }
        self.holders.push((context, 1));
        true
    }

    /// Release one level for `context`.
    ///
    /// Returns the pending emission when this was the outermost release of
    /// the last holder and something was recorded. Releasing a context that
    /// does not hold the lock does nothing.
    pub fn release(&mut self, context: ContextId) -> Option<Emission> {
        let idx = self.holders.iter().position(|(c, _)| *c == context)?;
        let depth = &mut self.holders[idx].1;
        *depth -= 1;
        if *depth > 0 {
            return None;
        }
        self.holders.swap_remove(idx);
        if self.holders.is_empty() {
            self.pending.take()
        } else {
            None
        }
    }

    /// Drop `context` entirely without handing back the pending emission.
    pub fn abandon(&mut self, context: ContextId) {
        self.holders.retain(|(c, _)| *c != context);
        if self.holders.is_empty() {
            self.pending = None;
        }
    }

    /// Record an emission while held (replaces any earlier one).
    pub fn record(&mut self, emission: Emission) {
        self.pending = Some(emission);
    }

    #[must_use]
    pub fn pending(&self) -> Option<&Emission> {
        self.pending.as_ref()
    }
}
