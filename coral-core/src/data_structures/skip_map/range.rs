use std::cmp::Ordering;
use std::ops::Bound;
use std::ptr;

use super::node::{Node, Slot};
use super::skip_list_map::{EQ, GT, LT, SkipListMap};
use crate::data_structures::comparator::Comparator;
use crate::guard::Guard;

/// Lower and upper key bounds of a range view.
#[derive(Clone, Debug)]
pub(crate) struct KeyRange<K> {
    pub(crate) lo: Bound<K>,
    pub(crate) hi: Bound<K>,
}

pub(crate) fn bound<K>(key: K, inclusive: bool) -> Bound<K> {
    if inclusive {
        Bound::Included(key)
    } else {
        Bound::Excluded(key)
    }
}

impl<K> KeyRange<K> {
    pub(crate) fn full() -> Self {
        KeyRange {
            lo: Bound::Unbounded,
            hi: Bound::Unbounded,
        }
    }

    pub(crate) fn too_low<C: Comparator<K>>(&self, key: &K, cmp: &C) -> bool {
        match &self.lo {
            Bound::Unbounded => false,
            Bound::Included(lo) => cmp.compare(key, lo) == Ordering::Less,
            Bound::Excluded(lo) => cmp.compare(key, lo) != Ordering::Greater,
        }
    }

    pub(crate) fn too_high<C: Comparator<K>>(&self, key: &K, cmp: &C) -> bool {
        match &self.hi {
            Bound::Unbounded => false,
            Bound::Included(hi) => cmp.compare(key, hi) == Ordering::Greater,
            Bound::Excluded(hi) => cmp.compare(key, hi) != Ordering::Less,
        }
    }

    pub(crate) fn contains<C: Comparator<K>>(&self, key: &K, cmp: &C) -> bool {
        !self.too_low(key, cmp) && !self.too_high(key, cmp)
    }

    /// First live node at or above the lower bound. May lie above `hi`.
    pub(crate) unsafe fn lo_node<V, G: Guard, C: Comparator<K>>(
        &self,
        map: &SkipListMap<K, V, G, C>,
    ) -> *mut Node<K, V> {
        unsafe {
            match &self.lo {
                Bound::Unbounded => map.find_first(),
                Bound::Included(lo) => map.find_near(lo, GT | EQ),
                Bound::Excluded(lo) => map.find_near(lo, GT),
            }
        }
    }

    /// Last live node at or below the upper bound. May lie below `lo`.
    pub(crate) unsafe fn hi_node<V, G: Guard, C: Comparator<K>>(
        &self,
        map: &SkipListMap<K, V, G, C>,
    ) -> *mut Node<K, V> {
        unsafe {
            match &self.hi {
                Bound::Unbounded => map.find_last(),
                Bound::Included(hi) => map.find_near(hi, LT | EQ),
                Bound::Excluded(hi) => map.find_near(hi, LT),
            }
        }
    }

    /// Whether an ascending walk that reached `n` is still inside the range.
    /// Markers pass, they carry no key.
    pub(crate) unsafe fn is_before_end<V, C: Comparator<K>>(&self, n: *mut Node<K, V>, cmp: &C) -> bool {
        unsafe {
            if n.is_null() {
                return false;
            }
            if matches!(self.hi, Bound::Unbounded) || (*n).is_marker() {
                return true;
            }
            !self.too_high((*n).key(), cmp)
        }
    }

    /// The live node an iteration in the given direction starts from, or
    /// null when the range is empty.
    pub(crate) unsafe fn start_node<V, G: Guard, C: Comparator<K>>(
        &self,
        map: &SkipListMap<K, V, G, C>,
        descending: bool,
    ) -> (*mut Node<K, V>, *mut V) {
        unsafe {
            loop {
                let n = if descending {
                    self.hi_node(map)
                } else {
                    self.lo_node(map)
                };
                if n.is_null() {
                    return (ptr::null_mut(), ptr::null_mut());
                }
                if let Slot::Value(v) = (*n).slot() {
                    if self.contains((*n).key(), map.comparator()) {
                        return (n, v);
                    }
                    return (ptr::null_mut(), ptr::null_mut());
                }
            }
        }
    }
}
