use std::ptr;

use super::node::{Node, Slot};
use super::range::KeyRange;
use super::skip_list_map::{LT, SkipListMap};
use crate::data_structures::comparator::Comparator;
use crate::guard::Guard;

// ============================================================================
// Cursor
// ============================================================================

/// Weakly consistent position in the base list.
///
/// The cursor holds a read guard for its whole lifetime, so every node it
/// has seen stays allocated even after it is removed. It always has the next
/// live entry (and the value observed on it) ready before it is asked for
/// one. Entries inserted behind the cursor are not seen; entries removed
/// after being staged are still returned.
struct Cursor<'a, K, V, G: Guard, C> {
    _guard: G::ReadGuard,
    map: &'a SkipListMap<K, V, G, C>,
    range: KeyRange<K>,
    descending: bool,
    next: *mut Node<K, V>,
    next_value: *mut V,
}

impl<'a, K, V, G: Guard, C: Comparator<K>> Cursor<'a, K, V, G, C> {
    fn new(map: &'a SkipListMap<K, V, G, C>, range: KeyRange<K>, descending: bool) -> Self {
        let guard = G::pin();
        let (next, next_value) = unsafe { range.start_node(map, descending) };
        Cursor {
            _guard: guard,
            map,
            range,
            descending,
            next,
            next_value,
        }
    }

    /// Hand out the staged entry and stage the one after it.
    fn advance<R>(&mut self, f: impl FnOnce(&K, &V) -> R) -> Option<R> {
        if self.next.is_null() {
            return None;
        }
        let current = self.next;
        let result = unsafe { f((*current).key(), &*self.next_value) };
        unsafe {
            if self.descending {
                self.descend(current);
            } else {
                self.ascend(current);
            }
        }
        Some(result)
    }

    unsafe fn ascend(&mut self, from: *mut Node<K, V>) {
        unsafe {
            let mut n = (*from).next();
            while !n.is_null() {
                if let Slot::Value(v) = (*n).slot() {
                    if self.range.too_high((*n).key(), self.map.comparator()) {
                        break;
                    }
                    self.next = n;
                    self.next_value = v;
                    return;
                }
                n = (*n).next();
            }
            self.next = ptr::null_mut();
        }
    }

    unsafe fn descend(&mut self, from: *mut Node<K, V>) {
        unsafe {
            let key = (*from).key();
            loop {
                let n = self.map.find_near(key, LT);
                if n.is_null() {
                    break;
                }
                if let Slot::Value(v) = (*n).slot() {
                    if self.range.too_low((*n).key(), self.map.comparator()) {
                        break;
                    }
                    self.next = n;
                    self.next_value = v;
                    return;
                }
            }
            self.next = ptr::null_mut();
        }
    }
}

// ============================================================================
// Iterators
// ============================================================================

/// Iterator over cloned `(key, value)` pairs.
///
/// Produced by [`SkipListMap::iter`], [`SkipListMap::descending_iter`] and
/// the matching [`SubMap`](super::SubMap) methods.
pub struct Iter<'a, K, V, G: Guard, C> {
    cursor: Cursor<'a, K, V, G, C>,
}

/// Iterator over cloned keys.
pub struct Keys<'a, K, V, G: Guard, C> {
    cursor: Cursor<'a, K, V, G, C>,
}

/// Iterator over cloned values.
pub struct Values<'a, K, V, G: Guard, C> {
    cursor: Cursor<'a, K, V, G, C>,
}

impl<'a, K, V, G: Guard, C: Comparator<K>> Iter<'a, K, V, G, C> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G, C>, range: KeyRange<K>, descending: bool) -> Self {
        Iter {
            cursor: Cursor::new(map, range, descending),
        }
    }
}

impl<'a, K, V, G: Guard, C: Comparator<K>> Keys<'a, K, V, G, C> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G, C>, range: KeyRange<K>, descending: bool) -> Self {
        Keys {
            cursor: Cursor::new(map, range, descending),
        }
    }
}

impl<'a, K, V, G: Guard, C: Comparator<K>> Values<'a, K, V, G, C> {
    pub(crate) fn new(map: &'a SkipListMap<K, V, G, C>, range: KeyRange<K>, descending: bool) -> Self {
        Values {
            cursor: Cursor::new(map, range, descending),
        }
    }
}

impl<K: Clone, V: Clone, G: Guard, C: Comparator<K>> Iterator for Iter<'_, K, V, G, C> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|k, v| (k.clone(), v.clone()))
    }
}

impl<K: Clone, V, G: Guard, C: Comparator<K>> Iterator for Keys<'_, K, V, G, C> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|k, _| k.clone())
    }
}

impl<K, V: Clone, G: Guard, C: Comparator<K>> Iterator for Values<'_, K, V, G, C> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|_, v| v.clone())
    }
}

impl<K, V, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    /// Ascending iterator over the whole map.
    pub fn iter(&self) -> Iter<'_, K, V, G, C> {
        Iter::new(self, KeyRange::full(), false)
    }

    pub fn keys(&self) -> Keys<'_, K, V, G, C> {
        Keys::new(self, KeyRange::full(), false)
    }

    pub fn values(&self) -> Values<'_, K, V, G, C> {
        Values::new(self, KeyRange::full(), false)
    }

    /// Iterator from the greatest key down. Each step is a fresh search
    /// below the last returned key, so it costs O(log n) per entry.
    pub fn descending_iter(&self) -> Iter<'_, K, V, G, C> {
        Iter::new(self, KeyRange::full(), true)
    }

    pub fn descending_keys(&self) -> Keys<'_, K, V, G, C> {
        Keys::new(self, KeyRange::full(), true)
    }
}

impl<'a, K: Clone, V: Clone, G: Guard, C: Comparator<K>> IntoIterator for &'a SkipListMap<K, V, G, C> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V, G, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
