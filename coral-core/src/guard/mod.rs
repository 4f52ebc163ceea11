//! Guard trait for memory reclamation strategies.
//!
//! Lock-free maps cannot free an unlinked node the moment it leaves the
//! structure: a concurrent reader may still be standing on it. The `Guard`
//! trait abstracts over the strategy that decides when retired memory is
//! actually released.
//!
//! ```text
//! SkipListMap<K, V, G: Guard>
//!     │
//!     ├── SkipListMap<K, V, EpochGuard>      (production, coral-crossbeam)
//!     └── SkipListMap<K, V, DeferredGuard>   (testing, frees on drop)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use coral_core::{DeferredGuard, SkipListMap};
//! use coral_crossbeam::EpochGuard;
//!
//! // Production: epoch-based reclamation
//! let map: SkipListMap<i32, String, EpochGuard> = SkipListMap::new();
//! map.insert(42, "answer".to_string());
//!
//! // Testing: retired memory is kept until the map drops
//! let test_map: SkipListMap<i32, String, DeferredGuard> = SkipListMap::new();
//! ```

mod deferred_guard;

use std::ops::Deref;

pub use deferred_guard::{DeferredGuard, DeferredRef};

/// A memory reclamation guard that protects concurrent access to nodes.
///
/// - **EpochGuard**: Low overhead, batched reclamation (crossbeam-epoch)
/// - **DeferredGuard**: Defers all destruction until the guard drops (testing)
///
/// # Safety Contract
///
/// Implementations must ensure:
/// 1. Pointers passed to `defer_destroy` are not freed while any thread that
///    pinned before the call is still pinned
/// 2. `GuardedRef` keeps the referenced data valid for its lifetime
///
/// The guard stored in a map only schedules destruction. Pinning happens per
/// operation through [`Guard::pin`].
///
pub trait Guard: Sized + Default + Send + Sync {
    /// A reference protected by a guard of this type.
    type GuardedRef<'a, T: 'a>: Deref<Target = T>;

    /// An active guard that protects reads for its lifetime.
    ///
    /// For epoch-based guards this is a pinned `crossbeam_epoch::Guard`.
    /// For deferred guards it is `()`, the stored guard already keeps
    /// everything alive.
    type ReadGuard: Sized;

    /// Pin an active read guard.
    ///
    /// Every map operation holds one for its whole duration; iterators hold
    /// one for their lifetime.
    fn pin() -> Self::ReadGuard;

    /// Schedule a retired allocation for destruction.
    ///
    /// # Safety
    ///
    /// - `ptr` must be a valid allocation owned by the map
    /// - `ptr` must be unreachable for any thread that pins after this call
    /// - `dealloc` must be the matching destruction function and must run once
    ///
    unsafe fn defer_destroy<N>(&self, ptr: *mut N, dealloc: unsafe fn(*mut N));

    /// Create a guarded reference from a raw pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must point to data that is protected by a currently pinned guard
    /// - The data must remain valid for lifetime `'a`
    ///
    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T>;
}
