use std::cmp::Ordering;
use std::ops::Bound;
use std::ptr;

use super::iter::{Iter, Keys, Values};
use super::node::{Node, Slot};
use super::range::{KeyRange, bound};
use super::skip_list_map::{EQ, GT, LT, SkipListMap};
use crate::data_structures::comparator::Comparator;
use crate::error::{MapError, Result};
use crate::guard::Guard;

// =============================================================================
// RANGE VIEWS
// =============================================================================
//
//   map:           1    3    5    7    9    11
//   tail_map(5):             [5 ──────────────►
//   sub_map(3,9):       [3 ───────────)
//   descending:         ◄─────────── 3]         (same range, reversed order)
//
// A view stores only its bounds and a direction. Every call goes straight to
// the backing map and filters by the bounds, so views see concurrent changes
// and never hold entries of their own.
//
// In a descending view "first" means the greatest key, "lower" means greater,
// and `head_map` / `tail_map` are taken in the view's own order.
//
// =============================================================================

/// Live view of the keys of a [`SkipListMap`] inside a range, optionally in
/// descending order.
///
/// Mutations with a key outside the range fail with
/// [`MapError::KeyOutOfRange`]; lookups outside the range return `None`.
pub struct SubMap<'a, K, V, G: Guard, C> {
    map: &'a SkipListMap<K, V, G, C>,
    range: KeyRange<K>,
    descending: bool,
}

impl<'a, K, V, G: Guard, C: Comparator<K>> SubMap<'a, K, V, G, C> {
    pub(crate) fn new(
        map: &'a SkipListMap<K, V, G, C>,
        range: KeyRange<K>,
        descending: bool,
    ) -> Result<Self> {
        if let (Some(lo), Some(hi)) = (bound_key(&range.lo), bound_key(&range.hi)) {
            if map.compare(lo, hi) == Ordering::Greater {
                return Err(MapError::InvalidRange);
            }
        }
        Ok(SubMap {
            map,
            range,
            descending,
        })
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    fn in_bounds(&self, key: &K) -> bool {
        self.range.contains(key, self.map.comparator())
    }

    fn check_key_bounds(&self, key: &K) -> Result<()> {
        if self.in_bounds(key) {
            Ok(())
        } else {
            Err(MapError::KeyOutOfRange)
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn contains_key(&self, key: &K) -> bool {
        self.in_bounds(key) && self.map.contains_key(key)
    }

    pub fn get_and_apply<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        if !self.in_bounds(key) {
            return None;
        }
        self.map.get_and_apply(key, f)
    }

    /// Number of live mappings inside the range (O(n) scan).
    pub fn len(&self) -> usize {
        let _guard = G::pin();
        let mut count = 0;
        unsafe {
            let cmp = self.map.comparator();
            let mut n = self.range.lo_node(self.map);
            while self.range.is_before_end(n, cmp) {
                if let Slot::Value(_) = (*n).slot() {
                    count += 1;
                }
                n = (*n).next();
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        let _guard = G::pin();
        unsafe {
            let n = self.range.lo_node(self.map);
            !self.range.is_before_end(n, self.map.comparator())
        }
    }

    /// Visit every live mapping in the range, in the view's order.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let _guard = G::pin();
        unsafe {
            let (mut n, mut v) = self.range.start_node(self.map, self.descending);
            while !n.is_null() {
                f((*n).key(), &*v);
                (n, v) = self.step(n);
            }
        }
    }

    /// Next live node after `n` in view order, bounded by the range.
    unsafe fn step(&self, n: *mut Node<K, V>) -> (*mut Node<K, V>, *mut V) {
        unsafe {
            let cmp = self.map.comparator();
            if self.descending {
                loop {
                    let p = self.map.find_near((*n).key(), LT);
                    if p.is_null() {
                        break;
                    }
                    if let Slot::Value(v) = (*p).slot() {
                        if self.range.too_low((*p).key(), cmp) {
                            break;
                        }
                        return (p, v);
                    }
                }
            } else {
                let mut p = (*n).next();
                while !p.is_null() {
                    if let Slot::Value(v) = (*p).slot() {
                        if self.range.too_high((*p).key(), cmp) {
                            break;
                        }
                        return (p, v);
                    }
                    p = (*p).next();
                }
            }
            (ptr::null_mut(), ptr::null_mut())
        }
    }

    /// Flip a relation into the backing map's ascending terms.
    fn adjust(&self, rel: u8) -> u8 {
        if !self.descending {
            rel
        } else if rel & LT == 0 {
            rel | LT
        } else {
            rel & !LT
        }
    }

    /// Node nearest `key` under `rel` inside the range, in backing-map terms.
    unsafe fn near_node(&self, key: &K, rel: u8) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            let cmp = self.map.comparator();
            let rel = self.adjust(rel);
            if self.range.too_low(key, cmp) {
                return if rel & LT == 0 { self.lowest() } else { None };
            }
            if self.range.too_high(key, cmp) {
                return if rel & LT != 0 { self.highest() } else { None };
            }
            loop {
                let n = self.map.find_near(key, rel);
                if n.is_null() || !self.in_bounds((*n).key()) {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some((n, v));
                }
            }
        }
    }

    unsafe fn lowest(&self) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            loop {
                let n = self.range.lo_node(self.map);
                if !self.range.is_before_end(n, self.map.comparator()) {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some((n, v));
                }
            }
        }
    }

    unsafe fn highest(&self) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            loop {
                let n = self.range.hi_node(self.map);
                if n.is_null() || !self.in_bounds((*n).key()) {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some((n, v));
                }
            }
        }
    }

    /// First node in view order.
    unsafe fn first(&self) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            if self.descending {
                self.highest()
            } else {
                self.lowest()
            }
        }
    }

    /// Last node in view order.
    unsafe fn last(&self) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            if self.descending {
                self.lowest()
            } else {
                self.highest()
            }
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    pub fn remove_if(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> usize {
        let _guard = G::pin();
        let mut removed = 0;
        unsafe {
            let cmp = self.map.comparator();
            let mut n = self.range.lo_node(self.map);
            while self.range.is_before_end(n, cmp) {
                if let Slot::Value(v) = (*n).slot() {
                    let key = (*n).key();
                    if predicate(key, &*v)
                        && self
                            .map
                            .do_remove(key, |current| ptr::eq(current, v), |_| ())
                            .is_some()
                    {
                        removed += 1;
                    }
                }
                n = (*n).next();
            }
        }
        removed
    }

    /// Remove every mapping inside the range.
    pub fn clear(&self) {
        self.remove_if(|_, _| true);
    }
}

impl<'a, K, V: Clone, G: Guard, C: Comparator<K>> SubMap<'a, K, V, G, C> {
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_and_apply(key, V::clone)
    }

    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.check_key_bounds(&key)?;
        Ok(self.map.insert(key, value))
    }

    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        self.check_key_bounds(&key)?;
        Ok(self.map.put_if_absent(key, value))
    }

    pub fn replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.check_key_bounds(key)?;
        Ok(self.map.replace(key, value))
    }

    /// Removes `key` when it lies inside the range; outside keys are left alone.
    pub fn remove(&self, key: &K) -> Option<V> {
        if !self.in_bounds(key) {
            return None;
        }
        self.map.remove(key)
    }
}

impl<'a, K, V: PartialEq, G: Guard, C: Comparator<K>> SubMap<'a, K, V, G, C> {
    pub fn remove_if_equals(&self, key: &K, value: &V) -> bool {
        self.in_bounds(key) && self.map.remove_if_equals(key, value)
    }

    pub fn replace_if_equals(&self, key: &K, old: &V, new: V) -> Result<bool> {
        self.check_key_bounds(key)?;
        Ok(self.map.replace_if_equals(key, old, new))
    }

    pub fn contains_value(&self, value: &V) -> bool {
        let mut found = false;
        self.for_each(|_, v| found |= v == value);
        found
    }
}

// =============================================================================
// Navigation and nesting
// =============================================================================

impl<'a, K: Clone, V, G: Guard, C: Comparator<K>> SubMap<'a, K, V, G, C> {
    pub fn first_key(&self) -> Option<K> {
        let _guard = G::pin();
        unsafe { self.first().map(|(n, _)| (*n).key().clone()) }
    }

    pub fn last_key(&self) -> Option<K> {
        let _guard = G::pin();
        unsafe { self.last().map(|(n, _)| (*n).key().clone()) }
    }

    fn near_key(&self, key: &K, rel: u8) -> Option<K> {
        let _guard = G::pin();
        unsafe { self.near_node(key, rel).map(|(n, _)| (*n).key().clone()) }
    }

    /// Closest key before `key` in view order.
    pub fn lower_key(&self, key: &K) -> Option<K> {
        self.near_key(key, LT)
    }

    pub fn floor_key(&self, key: &K) -> Option<K> {
        self.near_key(key, LT | EQ)
    }

    pub fn ceiling_key(&self, key: &K) -> Option<K> {
        self.near_key(key, GT | EQ)
    }

    /// Closest key after `key` in view order.
    pub fn higher_key(&self, key: &K) -> Option<K> {
        self.near_key(key, GT)
    }

    /// Narrow this view to `from..to` given in the view's own order.
    ///
    /// Fails with [`MapError::KeyOutOfRange`] if either bound lies outside
    /// this view and with [`MapError::InvalidRange`] if `from` comes after
    /// `to`.
    pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> Result<SubMap<'a, K, V, G, C>> {
        self.narrow(bound(from, from_inclusive), bound(to, to_inclusive))
    }

    /// Keys before `to` in view order.
    pub fn head_map(&self, to: K, inclusive: bool) -> Result<SubMap<'a, K, V, G, C>> {
        self.narrow(Bound::Unbounded, bound(to, inclusive))
    }

    /// Keys from `from` onward in view order.
    pub fn tail_map(&self, from: K, inclusive: bool) -> Result<SubMap<'a, K, V, G, C>> {
        self.narrow(bound(from, inclusive), Bound::Unbounded)
    }

    /// The same range in the opposite order.
    pub fn descending_map(&self) -> SubMap<'a, K, V, G, C> {
        SubMap {
            map: self.map,
            range: self.range.clone(),
            descending: !self.descending,
        }
    }

    fn narrow(&self, from: Bound<K>, to: Bound<K>) -> Result<SubMap<'a, K, V, G, C>> {
        let (lo, hi) = if self.descending { (to, from) } else { (from, to) };
        let cmp = self.map.comparator();

        let lo = match (lo, &self.range.lo) {
            (Bound::Unbounded, inherited) => inherited.clone(),
            (requested, Bound::Unbounded) => requested,
            (requested, inherited) => {
                let (key, inclusive) = bound_parts(&requested);
                let (limit, limit_inclusive) = bound_parts(inherited);
                let c = cmp.compare(key, limit);
                if c == Ordering::Less || (c == Ordering::Equal && !limit_inclusive && inclusive) {
                    return Err(MapError::KeyOutOfRange);
                }
                requested
            }
        };

        let hi = match (hi, &self.range.hi) {
            (Bound::Unbounded, inherited) => inherited.clone(),
            (requested, Bound::Unbounded) => requested,
            (requested, inherited) => {
                let (key, inclusive) = bound_parts(&requested);
                let (limit, limit_inclusive) = bound_parts(inherited);
                let c = cmp.compare(key, limit);
                if c == Ordering::Greater || (c == Ordering::Equal && !limit_inclusive && inclusive) {
                    return Err(MapError::KeyOutOfRange);
                }
                requested
            }
        };

        SubMap::new(self.map, KeyRange { lo, hi }, self.descending)
    }

    pub fn iter(&self) -> Iter<'a, K, V, G, C> {
        Iter::new(self.map, self.range.clone(), self.descending)
    }

    pub fn keys(&self) -> Keys<'a, K, V, G, C> {
        Keys::new(self.map, self.range.clone(), self.descending)
    }

    pub fn values(&self) -> Values<'a, K, V, G, C> {
        Values::new(self.map, self.range.clone(), self.descending)
    }

    /// Keys in the reverse of the view's order.
    pub fn descending_keys(&self) -> Keys<'a, K, V, G, C> {
        Keys::new(self.map, self.range.clone(), !self.descending)
    }
}

impl<'a, K: Clone, V: Clone, G: Guard, C: Comparator<K>> SubMap<'a, K, V, G, C> {
    pub fn first_entry(&self) -> Option<(K, V)> {
        let _guard = G::pin();
        unsafe { self.first().map(|(n, v)| ((*n).key().clone(), (*v).clone())) }
    }

    pub fn last_entry(&self) -> Option<(K, V)> {
        let _guard = G::pin();
        unsafe { self.last().map(|(n, v)| ((*n).key().clone(), (*v).clone())) }
    }

    fn near_entry(&self, key: &K, rel: u8) -> Option<(K, V)> {
        let _guard = G::pin();
        unsafe { self.near_node(key, rel).map(|(n, v)| ((*n).key().clone(), (*v).clone())) }
    }

    pub fn lower_entry(&self, key: &K) -> Option<(K, V)> {
        self.near_entry(key, LT)
    }

    pub fn floor_entry(&self, key: &K) -> Option<(K, V)> {
        self.near_entry(key, LT | EQ)
    }

    pub fn ceiling_entry(&self, key: &K) -> Option<(K, V)> {
        self.near_entry(key, GT | EQ)
    }

    pub fn higher_entry(&self, key: &K) -> Option<(K, V)> {
        self.near_entry(key, GT)
    }

    pub fn poll_first_entry(&self) -> Option<(K, V)> {
        self.poll(false)
    }

    pub fn poll_last_entry(&self) -> Option<(K, V)> {
        self.poll(true)
    }

    /// Remove the entry at one end of the view, retrying when it is taken by
    /// someone else first.
    fn poll(&self, last: bool) -> Option<(K, V)> {
        let _guard = G::pin();
        unsafe {
            loop {
                let (n, _) = if last { self.last()? } else { self.first()? };
                let key = (*n).key();
                if let Some(value) = self.map.do_remove(key, |_| true, V::clone) {
                    return Some((key.clone(), value));
                }
            }
        }
    }
}

fn bound_key<K>(b: &Bound<K>) -> Option<&K> {
    match b {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    }
}

fn bound_parts<K>(b: &Bound<K>) -> (&K, bool) {
    match b {
        Bound::Included(key) => (key, true),
        Bound::Excluded(key) => (key, false),
        Bound::Unbounded => unreachable!("unbounded ends are matched before comparison"),
    }
}

// =============================================================================
// Views on the map
// =============================================================================

impl<K, V, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    /// Keys from `from` to `to`. Fails with [`MapError::InvalidRange`] when
    /// `from` is greater than `to`.
    pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> Result<SubMap<'_, K, V, G, C>> {
        SubMap::new(
            self,
            KeyRange {
                lo: bound(from, from_inclusive),
                hi: bound(to, to_inclusive),
            },
            false,
        )
    }

    /// Keys less than (or equal to) `to`.
    pub fn head_map(&self, to: K, inclusive: bool) -> SubMap<'_, K, V, G, C> {
        SubMap {
            map: self,
            range: KeyRange {
                lo: Bound::Unbounded,
                hi: bound(to, inclusive),
            },
            descending: false,
        }
    }

    /// Keys greater than (or equal to) `from`.
    pub fn tail_map(&self, from: K, inclusive: bool) -> SubMap<'_, K, V, G, C> {
        SubMap {
            map: self,
            range: KeyRange {
                lo: bound(from, inclusive),
                hi: Bound::Unbounded,
            },
            descending: false,
        }
    }

    /// The whole map in descending order.
    pub fn descending_map(&self) -> SubMap<'_, K, V, G, C> {
        SubMap {
            map: self,
            range: KeyRange::full(),
            descending: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::data_structures::SkipListMap;
    use crate::error::MapError;
    use crate::guard::DeferredGuard;

    fn odd_map() -> SkipListMap<i32, i32, DeferredGuard> {
        let map = SkipListMap::new();
        for k in (1..=11).step_by(2) {
            map.insert(k, k * 100);
        }
        map
    }

    #[test]
    fn test_tail_map_bounds() {
        let map = odd_map();
        let tail = map.tail_map(5, true);

        assert_eq!(tail.first_key(), Some(5));
        assert_eq!(tail.insert(3, 0), Err(MapError::KeyOutOfRange));
        assert_eq!(tail.len(), 4);
        assert_eq!(tail.get(&3), None);
        assert_eq!(tail.remove(&3), None);
        assert_eq!(map.get(&3), Some(300));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let map = odd_map();
        assert_eq!(map.sub_map(9, true, 3, true).err(), Some(MapError::InvalidRange));
    }

    #[test]
    fn test_nested_view_out_of_range() {
        let map = odd_map();
        let sub = map.sub_map(3, true, 9, false).unwrap();

        assert_eq!(sub.sub_map(1, true, 5, true).err(), Some(MapError::KeyOutOfRange));
        assert_eq!(sub.head_map(9, true).err(), Some(MapError::KeyOutOfRange));

        let inner = sub.head_map(9, false).unwrap();
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec![3, 5, 7]);
    }

    #[test]
    fn test_descending_view_navigation() {
        let map = odd_map();
        let desc = map.sub_map(3, true, 9, true).unwrap().descending_map();

        assert_eq!(desc.first_key(), Some(9));
        assert_eq!(desc.last_key(), Some(3));
        // "higher" follows the view order
        assert_eq!(desc.higher_key(&7), Some(5));
        assert_eq!(desc.lower_key(&7), Some(9));
        assert_eq!(desc.ceiling_key(&6), Some(5));
        assert_eq!(desc.floor_key(&6), Some(7));
        assert_eq!(desc.keys().collect::<Vec<_>>(), vec![9, 7, 5, 3]);

        let head = desc.head_map(5, false).unwrap();
        assert_eq!(head.keys().collect::<Vec<_>>(), vec![9, 7]);
    }

    #[test]
    fn test_poll_within_range() {
        let map = odd_map();
        let sub = map.sub_map(4, true, 8, true).unwrap();

        assert_eq!(sub.poll_first_entry(), Some((5, 500)));
        assert_eq!(sub.poll_last_entry(), Some((7, 700)));
        assert_eq!(sub.poll_first_entry(), None);
        assert!(sub.is_empty());
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_clear_range_only() {
        let map = odd_map();
        map.sub_map(3, false, 9, false).unwrap().clear();

        assert_eq!(map.keys().collect::<Vec<_>>(), vec![1, 3, 9, 11]);
    }
}
