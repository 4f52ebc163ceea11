//! Deferred guard implementation for testing.
//!
//! `DeferredGuard` keeps every retired allocation until the guard itself is
//! dropped, which makes destruction timing predictable and lets tests count
//! exactly how much memory a map has retired.

#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Mutex;

use super::Guard;

/// A guard that defers all destruction until it is dropped.
///
/// Not suitable for long-running production use: retired memory accumulates
/// until the owning map goes away.
///
/// In debug builds a pointer retired twice panics immediately. A double
/// retire means the map's link accounting released the same node twice.
///
pub struct DeferredGuard {
    retired: Mutex<Vec<Retired>>,
    #[cfg(debug_assertions)]
    seen: Mutex<HashSet<usize>>,
}

struct Retired {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

// Safety: the pointer is only dereferenced by `dealloc` when the guard drops,
// at which point the owning map is gone and nothing else can observe it.
unsafe impl Send for Retired {}

impl DeferredGuard {
    /// Create a new deferred guard.
    pub fn new() -> Self {
        DeferredGuard {
            retired: Mutex::new(Vec::new()),
            #[cfg(debug_assertions)]
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Number of allocations retired so far and still waiting for the drop.
    pub fn pending(&self) -> usize {
        self.retired.lock().map(|retired| retired.len()).unwrap_or(0)
    }
}

impl Default for DeferredGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredGuard {
    fn drop(&mut self) {
        let retired = match self.retired.get_mut() {
            Ok(retired) => retired,
            Err(poisoned) => poisoned.into_inner(),
        };

        for entry in retired.drain(..) {
            unsafe {
                (entry.dealloc)(entry.ptr);
            }
        }
    }
}

/// A plain reference wrapper for `DeferredGuard`.
///
/// Nothing is freed before the guard drops, so the reference stays valid for
/// as long as the map it was taken from.
///
pub struct DeferredRef<'a, T> {
    data: &'a T,
}

impl<'a, T> DeferredRef<'a, T> {
    /// Create a new deferred reference.
    pub fn new(data: &'a T) -> Self {
        DeferredRef { data }
    }
}

impl<T> Deref for DeferredRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl Guard for DeferredGuard {
    type GuardedRef<'a, T: 'a> = DeferredRef<'a, T>;

    type ReadGuard = ();

    fn pin() -> Self::ReadGuard {}

    unsafe fn defer_destroy<N>(&self, ptr: *mut N, dealloc: unsafe fn(*mut N)) {
        #[cfg(debug_assertions)]
        {
            let mut seen = match self.seen.lock() {
                Ok(seen) => seen,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !seen.insert(ptr as usize) {
                panic!("allocation {:#x} retired twice", ptr as usize);
            }
        }

        let entry = Retired {
            ptr: ptr as *mut (),
            dealloc: unsafe { std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc) },
        };

        match self.retired.lock() {
            Ok(mut retired) => retired.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T> {
        DeferredRef::new(unsafe { &*ptr })
    }
}
