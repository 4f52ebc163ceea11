use std::cmp::Ordering;
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{self, AtomicPtr};

use super::node::{HeadIndex, Index, Node, Slot, drop_value};
use crate::data_structures::comparator::{Comparator, NaturalOrder};
use crate::guard::Guard;
use crate::tracing_helpers::{debug_log, trace_log};

/// Relation bits for [`SkipListMap::find_near`]. `GT` is the absence of `LT`.
pub(crate) const EQ: u8 = 1;
pub(crate) const LT: u8 = 2;
pub(crate) const GT: u8 = 0;

const MAX_LEVEL: usize = 31;

/// The head is only lowered while it is taller than this.
const SHRINK_FLOOR: usize = 3;

// =============================================================================
// SKIP LIST MAP
// =============================================================================
//
// Level 3:  HEAD ───────────────────────────────► [30] ──────────────────► NULL
//             │                                    │
// Level 2:  HEAD ────────► [10] ────────────────► [30] ──────────────────► NULL
//             │              │                     │
// Level 1:  HEAD ────────► [10] ──────► [20] ───► [30] ──────────────────► NULL
//             │              │            │        │
// Base:     HEAD ────────►  10  ──────►  20  ───►  30  ──────►  40 ──────► NULL
//
// Only the base list is authoritative. Index levels are hints: they may lag
// behind insertions and still point at tombstones for a while. Every
// traversal that meets an index node whose base node is deleted unlinks it.
//
// INVARIANTS:
// 1. Base list strictly ascending under the comparator; no two live nodes
//    share a key
// 2. A tombstone is followed by its marker before it is unlinked, so nothing
//    can be inserted behind a node that is being removed
// 3. An index `right` link is frozen (marked) before its owner is unlinked;
//    frozen links never change again
// 4. The head index only grows by one level per insertion and only shrinks
//    when the top three levels look empty
//
// =============================================================================
// REMOVE (per key)
// =============================================================================
//
//   b ──► n[v] ──► f            CAS n.value v → null        (linearization point)
//   b ──► n[∅] ──► f            append marker behind n
//   b ──► n[∅] ──► (m) ──► f    CAS b.next n → f
//   b ──────────────────► f     find_predecessor(key) clears the index levels
//
// A thread that meets a tombstone while traversing performs whichever of the
// last two steps is missing (help_delete) and restarts.
//
// =============================================================================

/// Lock-free ordered map.
///
/// Keys are kept in the order defined by the map's [`Comparator`]. All
/// operations may be called concurrently from any number of threads through
/// a shared reference; none of them block.
///
/// Value-returning operations hand out clones. Use
/// [`get_and_apply`](Self::get_and_apply) or [`get_ref`](Self::get_ref) to look
/// at a value in place.
///
/// # Example
///
/// ```rust
/// use coral_core::{DeferredGuard, SkipListMap};
///
/// let map: SkipListMap<i32, &str, DeferredGuard> = SkipListMap::new();
/// map.insert(3, "c");
/// map.insert(1, "a");
/// map.insert(2, "b");
///
/// assert_eq!(map.first_key(), Some(1));
/// assert_eq!(map.ceiling_entry(&2), Some((2, "b")));
/// assert_eq!(map.remove(&1), Some("a"));
/// assert_eq!(map.len(), 2);
/// ```
pub struct SkipListMap<K, V, G: Guard, C = NaturalOrder> {
    head: AtomicPtr<HeadIndex<K, V>>,
    base: *mut Node<K, V>,
    comparator: C,
    guard: G,
}

unsafe impl<K: Send + Sync, V: Send + Sync, G: Guard, C: Send> Send for SkipListMap<K, V, G, C> {}
unsafe impl<K: Send + Sync, V: Send + Sync, G: Guard, C: Sync> Sync for SkipListMap<K, V, G, C> {}

fn random_level() -> usize {
    let bits = fastrand::u32(..);
    if bits & 1 != 0 {
        return 0;
    }
    let extra = (!(bits >> 1)).trailing_zeros() as usize;
    (1 + extra).min(MAX_LEVEL)
}

impl<K: Ord, V, G: Guard> SkipListMap<K, V, G> {
    /// Create an empty map ordered by `K: Ord`.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K, V, G: Guard, C: Comparator<K> + Default> Default for SkipListMap<K, V, G, C> {
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<K, V, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    /// Create an empty map ordered by `comparator`.
    pub fn with_comparator(comparator: C) -> Self {
        let base = Node::alloc_head();
        let head = HeadIndex::alloc(base, ptr::null_mut(), ptr::null_mut(), 1);

        SkipListMap {
            head: AtomicPtr::new(head),
            base,
            comparator,
            guard: G::default(),
        }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// The reclamation guard retired memory is handed to.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[inline]
    pub(crate) fn compare(&self, a: &K, b: &K) -> Ordering {
        self.comparator.compare(a, b)
    }

    /// Run the comparator on a key that would otherwise never meet another
    /// one, so a comparator rejecting it fails before the first insert lands.
    #[inline]
    fn check_comparable(&self, key: &K) {
        self.comparator.compare(key, key);
    }

    #[inline]
    fn head(&self) -> *mut HeadIndex<K, V> {
        self.head.load(atomic::Ordering::Acquire)
    }

    #[inline]
    fn head_index(&self) -> *mut Index<K, V> {
        HeadIndex::as_index(self.head())
    }

    #[inline]
    fn cas_head(&self, current: *mut HeadIndex<K, V>, new: *mut HeadIndex<K, V>) -> bool {
        self.head
            .compare_exchange(current, new, atomic::Ordering::AcqRel, atomic::Ordering::Acquire)
            .is_ok()
    }

    /// Drop `count` link references of `node`, retiring it on the last one.
    unsafe fn release_node(&self, node: *mut Node<K, V>, count: usize) {
        unsafe {
            if (*node).release(count) {
                self.guard.defer_destroy(node, Node::finalize);
            }
        }
    }

    unsafe fn retire_value(&self, value: *mut V) {
        unsafe { self.guard.defer_destroy(value, drop_value::<V>) };
    }

    // =========================================================================
    // Index maintenance
    // =========================================================================

    /// Publish `t` between `q` and `succ`. Fails when `q` indexes a deleted
    /// node or `q.right` moved (or froze).
    unsafe fn link_index(
        &self,
        q: *mut Index<K, V>,
        succ: *mut Index<K, V>,
        t: *mut Index<K, V>,
    ) -> bool {
        unsafe {
            if (*(*q).node).is_deleted() {
                return false;
            }
            (*t).set_right(succ);
            (*q).cas_right(succ, t)
        }
    }

    /// Unlink `r` from behind `q`: freeze `r.right`, then swing `q` past it.
    /// The winner of the swing releases the level reference `r` held.
    unsafe fn unlink_index(&self, q: *mut Index<K, V>, r: *mut Index<K, V>) -> bool {
        unsafe {
            if (*(*q).node).is_deleted() {
                return false;
            }
            let succ = (*r).freeze();
            if (*q).cas_right(r, succ) {
                self.release_node((*r).node, 1);
                true
            } else {
                false
            }
        }
    }

    /// Finish a removal someone else started: append the marker if it is
    /// missing, otherwise unlink `n` and its marker from `b`.
    unsafe fn help_delete(&self, b: *mut Node<K, V>, n: *mut Node<K, V>, f: *mut Node<K, V>) {
        unsafe {
            if f == (*n).next() && n == (*b).next() {
                if f.is_null() || !(*f).is_marker() {
                    (*n).append_marker(f);
                } else if (*b).cas_next(n, (*f).next()) {
                    self.release_node(n, 1);
                }
            }
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Base node whose key is less than `key` (or the head), clearing stale
    /// index nodes on the way down. The result may already be deleted.
    pub(crate) unsafe fn find_predecessor(&self, key: &K) -> *mut Node<K, V> {
        unsafe {
            'restart: loop {
                let mut q = self.head_index();
                let mut r = (*q).right();
                loop {
                    if !r.is_null() {
                        let n = (*r).node;
                        if (*n).is_deleted() {
                            if !self.unlink_index(q, r) {
                                continue 'restart;
                            }
                            r = (*q).right();
                            continue;
                        }
                        if self.compare(key, (*n).key()) == Ordering::Greater {
                            q = r;
                            r = (*r).right();
                            continue;
                        }
                    }
                    let d = (*q).down;
                    if d.is_null() {
                        return (*q).node;
                    }
                    q = d;
                    r = (*d).right();
                }
            }
        }
    }

    /// Live node holding `key` together with the value observed on it.
    pub(crate) unsafe fn find_entry(&self, key: &K) -> Option<(*mut Node<K, V>, *mut V)> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor(key);
                let mut n = (*b).next();
                loop {
                    if n.is_null() {
                        return None;
                    }
                    let f = (*n).next();
                    if n != (*b).next() {
                        continue 'outer;
                    }
                    let v = match (*n).slot() {
                        Slot::Value(v) => v,
                        Slot::Tombstone => {
                            self.help_delete(b, n, f);
                            continue 'outer;
                        }
                        Slot::Marker => continue 'outer,
                    };
                    if (*b).is_deleted() {
                        continue 'outer;
                    }
                    match self.compare(key, (*n).key()) {
                        Ordering::Equal => return Some((n, v)),
                        Ordering::Less => return None,
                        Ordering::Greater => {
                            b = n;
                            n = f;
                        }
                    }
                }
            }
        }
    }

    pub(crate) unsafe fn find_node(&self, key: &K) -> *mut Node<K, V> {
        unsafe {
            self.find_entry(key)
                .map_or(ptr::null_mut(), |(node, _)| node)
        }
    }

    /// Closest live node to `key` satisfying `rel` (a combination of `LT`,
    /// `GT` and `EQ`), or null.
    pub(crate) unsafe fn find_near(&self, key: &K, rel: u8) -> *mut Node<K, V> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor(key);
                let mut n = (*b).next();
                loop {
                    if n.is_null() {
                        return if rel & LT == 0 || (*b).is_head() {
                            ptr::null_mut()
                        } else {
                            b
                        };
                    }
                    let f = (*n).next();
                    if n != (*b).next() {
                        continue 'outer;
                    }
                    match (*n).slot() {
                        Slot::Value(_) => {}
                        Slot::Tombstone => {
                            self.help_delete(b, n, f);
                            continue 'outer;
                        }
                        Slot::Marker => continue 'outer,
                    }
                    if (*b).is_deleted() {
                        continue 'outer;
                    }
                    let c = self.compare(key, (*n).key());
                    if (c == Ordering::Equal && rel & EQ != 0) || (c == Ordering::Less && rel & LT == 0) {
                        return n;
                    }
                    if c != Ordering::Greater && rel & LT != 0 {
                        return if (*b).is_head() { ptr::null_mut() } else { b };
                    }
                    b = n;
                    n = f;
                }
            }
        }
    }

    /// Apply `f` to the entry nearest `key` under `rel`, retrying until a
    /// candidate is observed with a live value.
    pub(crate) unsafe fn get_near<R>(&self, key: &K, rel: u8, f: impl FnOnce(&K, &V) -> R) -> Option<R> {
        unsafe {
            loop {
                let n = self.find_near(key, rel);
                if n.is_null() {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some(f((*n).key(), &*v));
                }
            }
        }
    }

    /// First live base node, helping deletions at the front.
    pub(crate) unsafe fn find_first(&self) -> *mut Node<K, V> {
        unsafe {
            loop {
                let b = self.base;
                let n = (*b).next();
                if n.is_null() {
                    return ptr::null_mut();
                }
                if !(*n).is_deleted() {
                    return n;
                }
                self.help_delete(b, n, (*n).next());
            }
        }
    }

    /// Last live base node: index levels right then down, then a base walk.
    pub(crate) unsafe fn find_last(&self) -> *mut Node<K, V> {
        unsafe {
            let mut q = self.head_index();
            loop {
                let r = (*q).right();
                if !r.is_null() {
                    if (*(*r).node).is_deleted() {
                        self.unlink_index(q, r);
                        q = self.head_index();
                    } else {
                        q = r;
                    }
                    continue;
                }
                if !(*q).down.is_null() {
                    q = (*q).down;
                    continue;
                }

                let mut b = (*q).node;
                let mut n = (*b).next();
                loop {
                    if n.is_null() {
                        return if (*b).is_head() { ptr::null_mut() } else { b };
                    }
                    let f = (*n).next();
                    if n != (*b).next() {
                        break;
                    }
                    match (*n).slot() {
                        Slot::Value(_) => {}
                        Slot::Tombstone => {
                            self.help_delete(b, n, f);
                            break;
                        }
                        Slot::Marker => break,
                    }
                    if (*b).is_deleted() {
                        break;
                    }
                    b = n;
                    n = f;
                }
                q = self.head_index();
            }
        }
    }

    /// Base node preceding the last one (or the head when there is at most
    /// one node), found through the index levels.
    unsafe fn find_predecessor_of_last(&self) -> *mut Node<K, V> {
        unsafe {
            'restart: loop {
                let mut q = self.head_index();
                loop {
                    let r = (*q).right();
                    if !r.is_null() {
                        if (*(*r).node).is_deleted() {
                            self.unlink_index(q, r);
                            continue 'restart;
                        }
                        if !(*(*r).node).next().is_null() {
                            q = r;
                            continue;
                        }
                    }
                    let d = (*q).down;
                    if d.is_null() {
                        return (*q).node;
                    }
                    q = d;
                }
            }
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert or update `key`. Returns `previous` applied to the value that
    /// was already mapped (and, unless `only_if_absent`, has been replaced).
    pub(crate) unsafe fn do_put<R>(
        &self,
        key: K,
        value: V,
        only_if_absent: bool,
        previous: impl FnOnce(&V) -> R,
    ) -> Option<R> {
        unsafe {
            if (*self.base).next().is_null() {
                self.check_comparable(&key);
            }

            // `value` stays owned until a publishing CAS; a lost CAS takes it back.
            let mut key = key;
            let mut value = value;
            let z = 'outer: loop {
                let mut b = self.find_predecessor(&key);
                let mut n = (*b).next();
                loop {
                    if !n.is_null() {
                        let f = (*n).next();
                        if n != (*b).next() {
                            continue 'outer;
                        }
                        let v = match (*n).slot() {
                            Slot::Value(v) => v,
                            Slot::Tombstone => {
                                self.help_delete(b, n, f);
                                continue 'outer;
                            }
                            Slot::Marker => continue 'outer,
                        };
                        if (*b).is_deleted() {
                            continue 'outer;
                        }
                        match self.compare(&key, (*n).key()) {
                            Ordering::Greater => {
                                b = n;
                                n = f;
                                continue;
                            }
                            Ordering::Equal => {
                                if only_if_absent {
                                    return Some(previous(&*v));
                                }
                                let boxed = Box::into_raw(Box::new(value));
                                if (*n).cas_value(v, boxed) {
                                    self.retire_value(v);
                                    return Some(previous(&*v));
                                }
                                value = *Box::from_raw(boxed);
                                continue 'outer;
                            }
                            Ordering::Less => {}
                        }
                    }

                    let boxed = Box::into_raw(Box::new(value));
                    let z = Node::alloc_data(key, boxed, n);
                    if (*b).cas_next(n, z) {
                        break 'outer z;
                    }
                    trace_log!("base splice lost, retrying");
                    key = Node::reclaim_unpublished(z);
                    value = *Box::from_raw(boxed);
                    continue 'outer;
                }
            };

            self.insert_index(z);
            None
        }
    }

    /// Build and splice the index tower of a freshly linked node `z`.
    unsafe fn insert_index(&self, z: *mut Node<K, V>) {
        unsafe {
            let drawn = random_level();
            if drawn == 0 {
                self.release_node(z, 1);
                return;
            }

            let max = (*self.head()).level;
            let height = drawn.min(max + 1);

            let mut tower: Vec<*mut Index<K, V>> = Vec::with_capacity(height);
            let mut below = ptr::null_mut();
            for _ in 0..height {
                below = Index::alloc(z, below);
                tower.push(below);
            }
            (*z).set_tower(below);
            (*z).acquire(height);

            let mut linked = 0;
            let mut level = height;
            if height > max {
                loop {
                    let h = self.head();
                    let old_level = (*h).level;
                    if height <= old_level {
                        break;
                    }
                    let mut grown = h;
                    for j in old_level + 1..=height {
                        grown = HeadIndex::alloc(self.base, HeadIndex::as_index(grown), tower[j - 1], j);
                    }
                    if self.cas_head(h, grown) {
                        debug_log!(from = old_level, to = height, "index levels grown");
                        linked += height - old_level;
                        level = old_level;
                        break;
                    }
                    // never published
                    let mut p = grown;
                    while p != h {
                        let down = (*p).index.down as *mut HeadIndex<K, V>;
                        HeadIndex::dealloc(p);
                        p = down;
                    }
                }
            }

            linked += self.splice_tower(z, &tower, level);
            self.release_node(z, height - linked + 1);
        }
    }

    /// Link `tower[0..level]` top-down. Returns how many levels were linked.
    unsafe fn splice_tower(&self, z: *mut Node<K, V>, tower: &[*mut Index<K, V>], level: usize) -> usize {
        unsafe {
            let key = (*z).key();
            let mut insertion_level = level;
            let mut linked = 0;

            'splice: while insertion_level > 0 {
                let h = self.head();
                let mut j = (*h).level;
                if j < insertion_level {
                    // the levels we still owe were detached from the head
                    break;
                }
                let mut q = HeadIndex::as_index(h);
                let mut r = (*q).right();
                loop {
                    if !r.is_null() {
                        let n = (*r).node;
                        if (*n).is_deleted() {
                            if !self.unlink_index(q, r) {
                                continue 'splice;
                            }
                            r = (*q).right();
                            continue;
                        }
                        if self.compare(key, (*n).key()) == Ordering::Greater {
                            q = r;
                            r = (*r).right();
                            continue;
                        }
                    }

                    if j == insertion_level {
                        if !self.link_index(q, r, tower[j - 1]) {
                            continue 'splice;
                        }
                        linked += 1;
                        if (*z).is_deleted() {
                            // removed while we were building, clean up its levels
                            self.find_node(key);
                            break 'splice;
                        }
                        insertion_level -= 1;
                        if insertion_level == 0 {
                            break 'splice;
                        }
                    }

                    j -= 1;
                    q = (*q).down;
                    if q.is_null() {
                        break 'splice;
                    }
                    r = (*q).right();
                }
            }
            linked
        }
    }

    /// Remove `key` if its current value satisfies `matches`. Returns
    /// `removed` applied to the value that was taken out.
    pub(crate) unsafe fn do_remove<R>(
        &self,
        key: &K,
        matches: impl Fn(&V) -> bool,
        removed: impl FnOnce(&V) -> R,
    ) -> Option<R> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor(key);
                let mut n = (*b).next();
                loop {
                    if n.is_null() {
                        return None;
                    }
                    let f = (*n).next();
                    if n != (*b).next() {
                        continue 'outer;
                    }
                    let v = match (*n).slot() {
                        Slot::Value(v) => v,
                        Slot::Tombstone => {
                            self.help_delete(b, n, f);
                            continue 'outer;
                        }
                        Slot::Marker => continue 'outer,
                    };
                    if (*b).is_deleted() {
                        continue 'outer;
                    }
                    match self.compare(key, (*n).key()) {
                        Ordering::Less => return None,
                        Ordering::Greater => {
                            b = n;
                            n = f;
                            continue;
                        }
                        Ordering::Equal => {}
                    }
                    if !matches(&*v) {
                        return None;
                    }
                    if !(*n).cas_value(v, ptr::null_mut()) {
                        continue 'outer;
                    }
                    self.retire_value(v);
                    self.unlink_removed(b, n, f);
                    return Some(removed(&*v));
                }
            }
        }
    }

    /// Physical half of a removal whose value CAS this thread won.
    unsafe fn unlink_removed(&self, b: *mut Node<K, V>, n: *mut Node<K, V>, f: *mut Node<K, V>) {
        unsafe {
            let key = (*n).key();
            if !(*n).append_marker(f) || !(*b).cas_next(n, f) {
                // someone interfered, a traversal finishes the job
                self.find_node(key);
            } else {
                self.release_node(n, 1);
                self.find_predecessor(key);
                if (*self.head()).index.right().is_null() {
                    self.try_reduce_level();
                }
            }
        }
    }

    pub(crate) unsafe fn do_remove_first<R>(&self, removed: impl FnOnce(&K, &V) -> R) -> Option<R> {
        unsafe {
            loop {
                let b = self.base;
                let n = (*b).next();
                if n.is_null() {
                    return None;
                }
                let f = (*n).next();
                if n != (*b).next() {
                    continue;
                }
                let v = match (*n).slot() {
                    Slot::Value(v) => v,
                    Slot::Tombstone => {
                        self.help_delete(b, n, f);
                        continue;
                    }
                    Slot::Marker => continue,
                };
                if !(*n).cas_value(v, ptr::null_mut()) {
                    continue;
                }
                self.retire_value(v);
                let result = removed((*n).key(), &*v);
                if !(*n).append_marker(f) || !(*b).cas_next(n, f) {
                    self.find_first();
                } else {
                    self.release_node(n, 1);
                }
                self.clear_index_to_first();
                return Some(result);
            }
        }
    }

    /// Unlink the index nodes of a just-removed first node on every level.
    unsafe fn clear_index_to_first(&self) {
        unsafe {
            'restart: loop {
                let mut q = self.head_index();
                loop {
                    let r = (*q).right();
                    if !r.is_null() && (*(*r).node).is_deleted() && !self.unlink_index(q, r) {
                        continue 'restart;
                    }
                    q = (*q).down;
                    if q.is_null() {
                        if (*self.head()).index.right().is_null() {
                            self.try_reduce_level();
                        }
                        return;
                    }
                }
            }
        }
    }

    pub(crate) unsafe fn do_remove_last<R>(&self, removed: impl FnOnce(&K, &V) -> R) -> Option<R> {
        unsafe {
            'outer: loop {
                let mut b = self.find_predecessor_of_last();
                let mut n = (*b).next();
                if n.is_null() {
                    if (*b).is_head() {
                        return None;
                    }
                    continue;
                }
                loop {
                    let f = (*n).next();
                    if n != (*b).next() {
                        continue 'outer;
                    }
                    let v = match (*n).slot() {
                        Slot::Value(v) => v,
                        Slot::Tombstone => {
                            self.help_delete(b, n, f);
                            continue 'outer;
                        }
                        Slot::Marker => continue 'outer,
                    };
                    if (*b).is_deleted() {
                        continue 'outer;
                    }
                    if !f.is_null() {
                        b = n;
                        n = f;
                        continue;
                    }
                    if !(*n).cas_value(v, ptr::null_mut()) {
                        continue 'outer;
                    }
                    self.retire_value(v);
                    let result = removed((*n).key(), &*v);
                    self.unlink_removed(b, n, f);
                    return Some(result);
                }
            }
        }
    }

    // =========================================================================
    // Level management
    // =========================================================================

    /// Lower the head by one level when the top three levels look empty.
    ///
    /// Best effort: an insertion racing into the removed level is either
    /// caught by the recheck (and the head is put back) or released by
    /// [`abandon_level`](Self::abandon_level).
    unsafe fn try_reduce_level(&self) {
        unsafe {
            let h = self.head();
            if (*h).level <= SHRINK_FLOOR {
                return;
            }
            let d = (*h).index.down as *mut HeadIndex<K, V>;
            if d.is_null() {
                return;
            }
            let e = (*d).index.down as *mut HeadIndex<K, V>;
            if e.is_null() {
                return;
            }
            if (*e).index.right().is_null()
                && (*d).index.right().is_null()
                && (*h).index.right().is_null()
                && self.cas_head(h, d)
            {
                if !(*h).index.right().is_null() && self.cas_head(d, h) {
                    trace_log!(level = (*h).level, "level refilled during shrink, restored");
                    return;
                }
                self.abandon_level(h);
            }
        }
    }

    /// Retire a head index that is no longer reachable from `head`, releasing
    /// every index node that was still linked on its level.
    unsafe fn abandon_level(&self, h: *mut HeadIndex<K, V>) {
        unsafe {
            debug_log!(level = (*h).level, "index level detached");
            let mut p = HeadIndex::as_index(h);
            loop {
                let r = (*p).freeze();
                if r.is_null() {
                    break;
                }
                self.release_node((*r).node, 1);
                p = r;
            }
            self.guard.defer_destroy(h, HeadIndex::dealloc);
        }
    }
}

// =============================================================================
// Public operations
// =============================================================================

impl<K, V, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    /// Number of live mappings. Walks the whole base list, so this is O(n)
    /// and only a snapshot under concurrent mutation.
    pub fn len(&self) -> usize {
        let _pin = G::pin();
        let mut count = 0;
        unsafe {
            let mut n = self.find_first();
            while !n.is_null() {
                if let Slot::Value(_) = (*n).slot() {
                    count += 1;
                }
                n = (*n).next();
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        let _pin = G::pin();
        unsafe { self.find_first().is_null() }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let _pin = G::pin();
        unsafe { self.find_entry(key).is_some() }
    }

    /// Apply `f` to the value mapped to `key` without cloning it.
    pub fn get_and_apply<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let _pin = G::pin();
        unsafe { self.find_entry(key).map(|(_, v)| f(&*v)) }
    }

    /// Guard-protected reference to the value currently mapped to `key`.
    ///
    /// The reference stays valid after the mapping is replaced or removed;
    /// it simply no longer reflects the map.
    pub fn get_ref(&self, key: &K) -> Option<G::GuardedRef<'_, V>> {
        let _pin = G::pin();
        unsafe { self.find_entry(key).map(|(_, v)| G::make_ref(v as *const V)) }
    }

    /// Visit every live mapping in ascending order.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let _pin = G::pin();
        unsafe {
            let mut n = self.find_first();
            while !n.is_null() {
                if let Slot::Value(v) = (*n).slot() {
                    f((*n).key(), &*v);
                }
                n = (*n).next();
            }
        }
    }

    /// Remove every mapping for which `predicate` holds. A mapping whose value
    /// changes between the test and the removal is left alone.
    pub fn remove_if(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> usize {
        let _pin = G::pin();
        let mut removed = 0;
        unsafe {
            let mut n = self.find_first();
            while !n.is_null() {
                if let Slot::Value(v) = (*n).slot() {
                    let key = (*n).key();
                    if predicate(key, &*v)
                        && self
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

    /// Remove all mappings, one by one from the front.
    pub fn clear(&self) {
        let _pin = G::pin();
        unsafe { while self.do_remove_first(|_, _| ()).is_some() {} }
    }
}

impl<K, V: Clone, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_and_apply(key, V::clone)
    }

    pub fn get_or_default(&self, key: &K, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Map `key` to `value`, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let _pin = G::pin();
        unsafe { self.do_put(key, value, false, V::clone) }
    }

    /// Map `key` to `value` unless it is already mapped; returns the existing
    /// value in that case.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let _pin = G::pin();
        unsafe { self.do_put(key, value, true, V::clone) }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let _pin = G::pin();
        unsafe { self.do_remove(key, |_| true, V::clone) }
    }

    /// Replace the value of an existing mapping. Absent keys stay absent.
    pub fn replace(&self, key: &K, value: V) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            let mut value = value;
            loop {
                let (n, v) = self.find_entry(key)?;
                let boxed = Box::into_raw(Box::new(value));
                if (*n).cas_value(v, boxed) {
                    self.retire_value(v);
                    return Some((*v).clone());
                }
                value = *Box::from_raw(boxed);
            }
        }
    }

    /// Insert `f(&key)` if `key` is absent and `f` produces a value. Returns
    /// the value mapped afterwards.
    pub fn compute_if_absent(&self, key: K, f: impl FnOnce(&K) -> Option<V>) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            if let Some((_, v)) = self.find_entry(&key) {
                return Some((*v).clone());
            }
            let value = f(&key)?;
            let inserted = value.clone();
            Some(self.do_put(key, value, true, V::clone).unwrap_or(inserted))
        }
    }

    /// Recompute the value of a present mapping; `None` from `f` removes it.
    /// `f` may run more than once under contention.
    pub fn compute_if_present(&self, key: &K, f: impl Fn(&K, &V) -> Option<V>) -> Option<V> {
        let _pin = G::pin();
        unsafe {
            while let Some((n, v)) = self.find_entry(key) {
                match f(key, &*v) {
                    Some(next) => {
                        let result = next.clone();
                        let boxed = Box::into_raw(Box::new(next));
                        if (*n).cas_value(v, boxed) {
                            self.retire_value(v);
                            return Some(result);
                        }
                        drop(Box::from_raw(boxed));
                    }
                    None => {
                        if self
                            .do_remove(key, |current| ptr::eq(current, v), |_| ())
                            .is_some()
                        {
                            return None;
                        }
                    }
                }
            }
            None
        }
    }

    /// Map `key` to `value` if absent, otherwise to `f(old, value)`; `None`
    /// from `f` removes the mapping. Returns the value mapped afterwards.
    pub fn merge(&self, key: K, value: V, f: impl Fn(&V, &V) -> Option<V>) -> Option<V>
    where
        K: Clone,
    {
        let _pin = G::pin();
        unsafe {
            loop {
                let Some((n, v)) = self.find_entry(&key) else {
                    if self.do_put(key.clone(), value.clone(), true, |_| ()).is_none() {
                        return Some(value);
                    }
                    continue;
                };
                match f(&*v, &value) {
                    Some(next) => {
                        let result = next.clone();
                        let boxed = Box::into_raw(Box::new(next));
                        if (*n).cas_value(v, boxed) {
                            self.retire_value(v);
                            return Some(result);
                        }
                        drop(Box::from_raw(boxed));
                    }
                    None => {
                        if self
                            .do_remove(&key, |current| ptr::eq(current, v), |_| ())
                            .is_some()
                        {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

impl<K, V: PartialEq, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    /// Remove `key` only while it is mapped to a value equal to `value`.
    pub fn remove_if_equals(&self, key: &K, value: &V) -> bool {
        let _pin = G::pin();
        unsafe { self.do_remove(key, |current| current == value, |_| ()).is_some() }
    }

    /// Swap in `new` only while `key` is mapped to a value equal to `old`.
    pub fn replace_if_equals(&self, key: &K, old: &V, new: V) -> bool {
        let _pin = G::pin();
        unsafe {
            let mut new = new;
            while let Some((n, v)) = self.find_entry(key) {
                if *v != *old {
                    break;
                }
                let boxed = Box::into_raw(Box::new(new));
                if (*n).cas_value(v, boxed) {
                    self.retire_value(v);
                    return true;
                }
                new = *Box::from_raw(boxed);
            }
            false
        }
    }

    pub fn contains_value(&self, value: &V) -> bool {
        let mut found = false;
        self.for_each(|_, v| found |= v == value);
        found
    }
}

// =============================================================================
// Navigation
// =============================================================================

impl<K: Clone, V, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    pub fn first_key(&self) -> Option<K> {
        let _pin = G::pin();
        unsafe { self.find_first().as_ref().map(|n| n.key().clone()) }
    }

    pub fn last_key(&self) -> Option<K> {
        let _pin = G::pin();
        unsafe { self.find_last().as_ref().map(|n| n.key().clone()) }
    }

    fn near_key(&self, key: &K, rel: u8) -> Option<K> {
        let _pin = G::pin();
        unsafe { self.find_near(key, rel).as_ref().map(|n| n.key().clone()) }
    }

    /// Greatest key strictly less than `key`.
    pub fn lower_key(&self, key: &K) -> Option<K> {
        self.near_key(key, LT)
    }

    /// Greatest key less than or equal to `key`.
    pub fn floor_key(&self, key: &K) -> Option<K> {
        self.near_key(key, LT | EQ)
    }

    /// Least key greater than or equal to `key`.
    pub fn ceiling_key(&self, key: &K) -> Option<K> {
        self.near_key(key, GT | EQ)
    }

    /// Least key strictly greater than `key`.
    pub fn higher_key(&self, key: &K) -> Option<K> {
        self.near_key(key, GT)
    }
}

impl<K: Clone, V: Clone, G: Guard, C: Comparator<K>> SkipListMap<K, V, G, C> {
    pub fn first_entry(&self) -> Option<(K, V)> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.find_first();
                if n.is_null() {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some(((*n).key().clone(), (*v).clone()));
                }
            }
        }
    }

    pub fn last_entry(&self) -> Option<(K, V)> {
        let _pin = G::pin();
        unsafe {
            loop {
                let n = self.find_last();
                if n.is_null() {
                    return None;
                }
                if let Slot::Value(v) = (*n).slot() {
                    return Some(((*n).key().clone(), (*v).clone()));
                }
            }
        }
    }

    fn near_entry(&self, key: &K, rel: u8) -> Option<(K, V)> {
        let _pin = G::pin();
        unsafe { self.get_near(key, rel, |k, v| (k.clone(), v.clone())) }
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

    /// Remove and return the entry with the least key.
    pub fn poll_first_entry(&self) -> Option<(K, V)> {
        let _pin = G::pin();
        unsafe { self.do_remove_first(|k, v| (k.clone(), v.clone())) }
    }

    /// Remove and return the entry with the greatest key.
    pub fn poll_last_entry(&self) -> Option<(K, V)> {
        let _pin = G::pin();
        unsafe { self.do_remove_last(|k, v| (k.clone(), v.clone())) }
    }
}

impl<K, V, G: Guard, C> Drop for SkipListMap<K, V, G, C> {
    fn drop(&mut self) {
        // Exclusive access: collect every data node still reachable from any
        // level, then free each exactly once with its tower and marker.
        unsafe {
            let mut nodes: HashSet<*mut Node<K, V>> = HashSet::new();

            let mut n = (*self.base).next();
            while !n.is_null() {
                if !(*n).is_marker() {
                    nodes.insert(n);
                }
                n = (*n).next();
            }

            let mut h = HeadIndex::as_index(*self.head.get_mut());
            while !h.is_null() {
                let mut r = (*h).right();
                while !r.is_null() {
                    nodes.insert((*r).node);
                    r = (*r).right();
                }
                let down = (*h).down;
                HeadIndex::dealloc(h as *mut HeadIndex<K, V>);
                h = down;
            }

            for node in nodes {
                Node::finalize(node);
            }
            drop(Box::from_raw(self.base));
        }
    }
}
