use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::data_structures::internal::MarkedPtr;

// =============================================================================
// NODE LAYOUT
// =============================================================================
//
// Base level (every key lives here, ordered by the map's comparator):
//
//   HEAD ──► [k1|v1] ──► [k2|v2] ──► [k3|null] ──► (marker) ──► [k4|v4] ──► NULL
//                                        │              │
//                                     tombstone    unlink pending
//
// A data node's `value` is a boxed `V`. Removal swaps it to null (the node is
// now a tombstone), then appends a marker node behind it so that no insertion
// can land after the tombstone, then swings the predecessor past both.
//
// Index levels (`Index`) point down at lower index nodes and ultimately at the
// base node they index. A `HeadIndex` is an `Index` plus the level number.
//
// LIFETIME ACCOUNTING
// -------------------
//
//   refs = 1 (linked in the base list)
//        + 1 per index level where one of its index nodes is linked
//        + 1 while the inserting thread is still building its tower
//
// Every successful unlink CAS releases exactly one reference. When the count
// reaches zero the node is unreachable from every level and is handed to the
// guard. Its marker and its whole index tower are freed with it.
//
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeKind {
    Head,
    Data,
    Marker,
}

/// Snapshot of a node's value slot.
pub(crate) enum Slot<V> {
    Value(*mut V),
    Tombstone,
    Marker,
}

pub(crate) struct Node<K, V> {
    key: Option<K>,
    value: AtomicPtr<V>,
    next: AtomicPtr<Node<K, V>>,
    refs: AtomicUsize,
    /// Topmost index node of this node's tower, null when it has none.
    tower: AtomicPtr<Index<K, V>>,
    kind: NodeKind,
}

impl<K, V> Node<K, V> {
    // =========================================================================
    // Construction
    // =========================================================================

    pub(crate) fn alloc_head() -> *mut Self {
        Box::into_raw(Box::new(Node {
            key: None,
            value: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            refs: AtomicUsize::new(1),
            tower: AtomicPtr::new(ptr::null_mut()),
            kind: NodeKind::Head,
        }))
    }

    /// A fresh data node. It starts with the base-list reference and the
    /// builder's hold, both released through [`Node::release`].
    pub(crate) fn alloc_data(key: K, value: *mut V, next: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Node {
            key: Some(key),
            value: AtomicPtr::new(value),
            next: AtomicPtr::new(next),
            refs: AtomicUsize::new(2),
            tower: AtomicPtr::new(ptr::null_mut()),
            kind: NodeKind::Data,
        }))
    }

    fn alloc_marker(next: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Node {
            key: None,
            value: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(next),
            refs: AtomicUsize::new(0),
            tower: AtomicPtr::new(ptr::null_mut()),
            kind: NodeKind::Marker,
        }))
    }

    /// Take the key back out of a data node that was never published.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Node::alloc_data`] and must never have been
    /// visible to another thread. The value box is left to the caller.
    pub(crate) unsafe fn reclaim_unpublished(ptr: *mut Self) -> K {
        let mut node = unsafe { Box::from_raw(ptr) };
        node.key
            .take()
            .expect("unpublished data node always carries its key")
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub(crate) fn key(&self) -> &K {
        self.key
            .as_ref()
            .expect("head and marker nodes carry no key")
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut Self {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn value_ptr(&self) -> *mut V {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn slot(&self) -> Slot<V> {
        if self.kind == NodeKind::Marker {
            return Slot::Marker;
        }
        let value = self.value_ptr();
        if value.is_null() {
            Slot::Tombstone
        } else {
            Slot::Value(value)
        }
    }

    #[inline]
    pub(crate) fn is_head(&self) -> bool {
        self.kind == NodeKind::Head
    }

    #[inline]
    pub(crate) fn is_marker(&self) -> bool {
        self.kind == NodeKind::Marker
    }

    /// A data node whose value has been taken.
    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.kind == NodeKind::Data && self.value_ptr().is_null()
    }

    // =========================================================================
    // Atomic updates
    // =========================================================================

    #[inline]
    pub(crate) fn cas_next(&self, current: *mut Self, new: *mut Self) -> bool {
        self.next
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn cas_value(&self, current: *mut V, new: *mut V) -> bool {
        self.value
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Append a marker behind this (deleted) node, expecting `next` as the
    /// current successor.
    pub(crate) fn append_marker(&self, next: *mut Self) -> bool {
        let marker = Self::alloc_marker(next);
        if self.cas_next(next, marker) {
            true
        } else {
            // never published
            unsafe { drop(Box::from_raw(marker)) };
            false
        }
    }

    pub(crate) fn set_tower(&self, top: *mut Index<K, V>) {
        self.tower.store(top, Ordering::Release);
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    #[inline]
    pub(crate) fn acquire(&self, count: usize) {
        self.refs.fetch_add(count, Ordering::Relaxed);
    }

    /// Drop `count` references. Returns true when this was the last one and
    /// the caller must retire the node.
    #[inline]
    pub(crate) fn release(&self, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        let previous = self.refs.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "node released more often than linked");
        previous == count
    }

    /// Free a retired data node together with its marker, tower and value.
    ///
    /// # Safety
    ///
    /// `ptr` must be a data node that no thread can reach any more.
    pub(crate) unsafe fn finalize(ptr: *mut Self) {
        let node = unsafe { Box::from_raw(ptr) };

        let next = node.next.load(Ordering::Relaxed);
        if !next.is_null() && unsafe { (*next).is_marker() } {
            unsafe { drop(Box::from_raw(next)) };
        }

        let mut index = node.tower.load(Ordering::Relaxed);
        while !index.is_null() {
            let level = unsafe { Box::from_raw(index) };
            index = level.down;
        }

        let value = node.value.load(Ordering::Relaxed);
        if !value.is_null() {
            unsafe { drop(Box::from_raw(value)) };
        }
    }
}

/// Destructor handed to the guard for replaced or removed value boxes.
pub(crate) unsafe fn drop_value<V>(ptr: *mut V) {
    unsafe { drop(Box::from_raw(ptr)) };
}

// =============================================================================
// Index levels
// =============================================================================

#[repr(C)]
pub(crate) struct Index<K, V> {
    pub(crate) node: *mut Node<K, V>,
    pub(crate) down: *mut Index<K, V>,
    right: AtomicPtr<Index<K, V>>,
}

impl<K, V> Index<K, V> {
    pub(crate) fn alloc(node: *mut Node<K, V>, down: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Index {
            node,
            down,
            right: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Successor at this level with the freeze mark stripped.
    #[inline]
    pub(crate) fn right(&self) -> *mut Self {
        MarkedPtr::unmask(self.right.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_right(&self, right: *mut Self) {
        self.right.store(right, Ordering::Release);
    }

    /// CAS `right` from an unmarked `current`. Always fails once frozen.
    #[inline]
    pub(crate) fn cas_right(&self, current: *mut Self, new: *mut Self) -> bool {
        self.right
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark `right` so that it can no longer change and return the (clean)
    /// successor it was frozen at.
    pub(crate) fn freeze(&self) -> *mut Self {
        let mut current = MarkedPtr::new(self.right.load(Ordering::Acquire));
        loop {
            if current.is_frozen() {
                return current.as_ptr();
            }
            match self.right.compare_exchange_weak(
                current.as_raw(),
                current.frozen().as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current.as_ptr(),
                Err(actual) => current = MarkedPtr::new(actual),
            }
        }
    }
}

/// The first index of each level. `index` must stay the first field so a
/// `*mut HeadIndex` can be used wherever a `*mut Index` is expected.
#[repr(C)]
pub(crate) struct HeadIndex<K, V> {
    pub(crate) index: Index<K, V>,
    pub(crate) level: usize,
}

impl<K, V> HeadIndex<K, V> {
    pub(crate) fn alloc(
        node: *mut Node<K, V>,
        down: *mut Index<K, V>,
        right: *mut Index<K, V>,
        level: usize,
    ) -> *mut Self {
        Box::into_raw(Box::new(HeadIndex {
            index: Index {
                node,
                down,
                right: AtomicPtr::new(right),
            },
            level,
        }))
    }

    #[inline]
    pub(crate) fn as_index(ptr: *mut Self) -> *mut Index<K, V> {
        ptr as *mut Index<K, V>
    }

    pub(crate) unsafe fn dealloc(ptr: *mut Self) {
        unsafe { drop(Box::from_raw(ptr)) };
    }
}
