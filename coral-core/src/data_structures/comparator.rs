use std::cmp::Ordering;

/// Total order over keys used by a map.
///
/// The map never looks at `K: Ord` directly. Everything goes through the
/// comparator it was built with, so a map keyed by `String` can order by
/// length, case-insensitively, or in reverse.
///
/// Implementations must be consistent: a total order that does not change
/// while the map is alive. A comparator that panics propagates the panic out
/// of whichever map operation invoked it.
///
/// Any `Fn(&K, &K) -> Ordering` closure is a comparator:
///
/// ```rust,ignore
/// let map: SkipListMap<i32, &str, EpochGuard, _> =
///     SkipListMap::with_comparator(|a: &i32, b: &i32| b.cmp(a));
/// ```
pub trait Comparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their `Ord` implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}
