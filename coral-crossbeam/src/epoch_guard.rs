//! Epoch-based guard implementation using crossbeam-epoch.
//!
//! `EpochGuard` is the production reclamation strategy for `SkipListMap`.
//! Nodes, index towers and replaced values retired by the map are handed to
//! the global crossbeam collector and freed once every thread that could
//! still see them has moved to a later epoch.
//!
//! ```text
//! SkipListMap<K, V, EpochGuard>
//!     │
//!     ├── every operation pins the current thread
//!     └── unlinked nodes are deferred to the global collector
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use coral_core::SkipListMap;
//! use coral_crossbeam::EpochGuard;
//!
//! let map: SkipListMap<i32, String, EpochGuard> = SkipListMap::new();
//! map.insert(42, "answer".to_string());
//!
//! if let Some(value) = map.get_ref(&42) {
//!     println!("found: {}", *value);
//! }
//!
//! map.remove(&42);
//! ```

use std::fmt;
use std::ops::Deref;

use coral_core::guard::Guard;
use crossbeam_epoch::{self as epoch, Guard as CrossbeamGuard};

/// Epoch-based memory reclamation guard.
///
/// Zero-sized: all state lives in the global epoch collector, so a map
/// holding one stays `Send` and `Sync` without any locking on retire.
///
/// `defer_destroy` pins the calling thread, queues the destruction behind
/// the current epoch and unpins again. Memory may accumulate while some
/// thread stays pinned for a long time, for example inside a slow scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochGuard {}

impl EpochGuard {
    pub fn new() -> Self {
        EpochGuard {}
    }
}

/// A value reference that keeps the current thread pinned.
///
/// Returned by `SkipListMap::get_ref`. The referenced value cannot be
/// reclaimed until this is dropped, even if the entry is removed or
/// replaced in the meantime.
pub struct EpochRef<'a, T> {
    _guard: CrossbeamGuard,
    reference: &'a T,
}

impl<'a, T> EpochRef<'a, T> {
    /// # Safety
    ///
    /// `reference` must stay valid while `guard` is pinned.
    pub(crate) unsafe fn new(guard: CrossbeamGuard, reference: &'a T) -> Self {
        EpochRef {
            _guard: guard,
            reference,
        }
    }

    pub fn get(&self) -> &T {
        self.reference
    }
}

impl<T> Deref for EpochRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.reference
    }
}

impl<T: fmt::Display> fmt::Display for EpochRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

impl<T: fmt::Debug> fmt::Debug for EpochRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EpochRef({:?})", self.reference)
    }
}

impl Guard for EpochGuard {
    type GuardedRef<'a, T: 'a> = EpochRef<'a, T>;

    /// A pinned crossbeam guard, held for the length of one map operation
    /// or for the lifetime of an iterator.
    type ReadGuard = CrossbeamGuard;

    fn pin() -> Self::ReadGuard {
        epoch::pin()
    }

    unsafe fn defer_destroy<N>(&self, ptr: *mut N, dealloc: unsafe fn(*mut N)) {
        let guard = epoch::pin();
        unsafe {
            guard.defer_unchecked(move || dealloc(ptr));
        }
    }

    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T> {
        // The caller's pin ends with its operation; the reference needs its own.
        let guard = epoch::pin();
        unsafe { EpochRef::new(guard, &*ptr) }
    }
}
