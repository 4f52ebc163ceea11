use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use crate::data_structures::SkipListMap;
use crate::error::MapError;
use crate::guard::Guard;

/// Test insert, get, overwrite and remove
pub fn test_basic_operations<G: Guard>() {
    let map: SkipListMap<i32, String, G> = SkipListMap::new();

    assert!(map.is_empty());
    assert_eq!(map.insert(5, "five".to_string()), None);
    assert_eq!(map.insert(10, "ten".to_string()), None);
    assert_eq!(map.insert(3, "three".to_string()), None);

    // Overwrite returns the previous value
    assert_eq!(map.insert(5, "FIVE".to_string()), Some("five".to_string()));
    assert_eq!(map.get(&5), Some("FIVE".to_string()));
    assert_eq!(map.len(), 3);

    assert!(map.contains_key(&3));
    assert!(!map.contains_key(&4));
    assert_eq!(map.get_and_apply(&10, |v| v.len()), Some(3));
    assert_eq!(map.get_or_default(&4, "none".to_string()), "none");

    assert_eq!(map.remove(&3), Some("three".to_string()));
    assert_eq!(map.remove(&3), None);
    assert!(!map.contains_key(&3));
    assert_eq!(map.len(), 2);

    let guarded = map.get_ref(&10).expect("10 is mapped");
    assert_eq!(guarded.as_str(), "ten");
}

/// Insert {5,1,3,2,4} and walk the navigation surface
pub fn test_round_trip_navigation<G: Guard>() {
    let map: SkipListMap<i32, i32, G> = SkipListMap::new();
    for k in [5, 1, 3, 2, 4] {
        map.insert(k, k * 10);
    }

    assert_eq!(map.keys().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(map.first_key(), Some(1));
    assert_eq!(map.last_key(), Some(5));
    assert_eq!(map.ceiling_key(&3), Some(3));
    assert_eq!(map.higher_key(&3), Some(4));
    assert_eq!(map.lower_key(&3), Some(2));
    assert_eq!(map.floor_key(&0), None);
    assert_eq!(map.higher_key(&5), None);

    assert_eq!(map.first_entry(), Some((1, 10)));
    assert_eq!(map.last_entry(), Some((5, 50)));
    assert_eq!(map.floor_entry(&10), Some((5, 50)));
    assert_eq!(map.ceiling_entry(&0), Some((1, 10)));
    assert_eq!(map.lower_entry(&1), None);
}

/// Test put_if_absent, replace and the equality-conditioned variants
pub fn test_conditional_operations<G: Guard>() {
    let map: SkipListMap<&'static str, u32, G> = SkipListMap::new();

    assert_eq!(map.put_if_absent("a", 1), None);
    assert_eq!(map.put_if_absent("a", 2), Some(1));
    assert_eq!(map.get(&"a"), Some(1));

    assert_eq!(map.replace(&"b", 5), None);
    assert!(!map.contains_key(&"b"));
    assert_eq!(map.replace(&"a", 3), Some(1));

    assert!(!map.replace_if_equals(&"a", &1, 4));
    assert!(map.replace_if_equals(&"a", &3, 4));
    assert_eq!(map.get(&"a"), Some(4));

    assert!(!map.remove_if_equals(&"a", &3));
    assert!(map.contains_key(&"a"));
    assert!(map.remove_if_equals(&"a", &4));
    assert!(map.is_empty());
}

/// Test poll_first_entry / poll_last_entry drain from both ends
pub fn test_poll_operations<G: Guard>() {
    let map: SkipListMap<i32, i32, G> = SkipListMap::new();
    assert_eq!(map.poll_first_entry(), None);
    assert_eq!(map.poll_last_entry(), None);

    for k in 0..100 {
        map.insert(k, -k);
    }

    for k in 0..50 {
        assert_eq!(map.poll_first_entry(), Some((k, -k)));
        assert_eq!(map.poll_last_entry(), Some((99 - k, k - 99)));
    }
    assert!(map.is_empty());
    assert_eq!(map.first_key(), None);
    assert_eq!(map.last_key(), None);
}

/// Test compute_if_absent, compute_if_present and merge
pub fn test_compute_and_merge<G: Guard>() {
    let map: SkipListMap<String, usize, G> = SkipListMap::new();

    assert_eq!(map.compute_if_absent("alpha".to_string(), |k| Some(k.len())), Some(5));
    assert_eq!(map.compute_if_absent("alpha".to_string(), |_| Some(0)), Some(5));
    assert_eq!(map.compute_if_absent("beta".to_string(), |_| None), None);
    assert!(!map.contains_key(&"beta".to_string()));

    assert_eq!(map.compute_if_present(&"alpha".to_string(), |_, v| Some(v * 2)), Some(10));
    assert_eq!(map.compute_if_present(&"gamma".to_string(), |_, v| Some(v * 2)), None);
    assert_eq!(map.compute_if_present(&"alpha".to_string(), |_, _| None), None);
    assert!(!map.contains_key(&"alpha".to_string()));

    let word = "w".to_string();
    assert_eq!(map.merge(word.clone(), 1, |old, add| Some(old + add)), Some(1));
    assert_eq!(map.merge(word.clone(), 1, |old, add| Some(old + add)), Some(2));
    assert_eq!(map.merge(word.clone(), 1, |_, _| None), None);
    assert!(map.is_empty());
}

/// Removed keys never show up in lookups, navigation or iteration
pub fn test_tombstone_invisibility<G: Guard>() {
    let map: SkipListMap<i32, i32, G> = SkipListMap::new();
    for k in 0..64 {
        map.insert(k, k);
    }
    for k in (0..64).filter(|k| k % 4 != 0) {
        assert_eq!(map.remove(&k), Some(k));
    }

    for k in (0..64).filter(|k| k % 4 != 0) {
        assert_eq!(map.get(&k), None);
        assert!(!map.contains_key(&k));
    }
    assert_eq!(map.ceiling_key(&1), Some(4));
    assert_eq!(map.floor_key(&63), Some(60));
    assert_eq!(map.higher_key(&60), None);
    assert_eq!(map.len(), 16);
    assert!(map.iter().all(|(k, _)| k % 4 == 0));
}

/// Test remove_if, contains_value, for_each and clear
pub fn test_bulk_operations<G: Guard>() {
    let map: SkipListMap<u32, u32, G> = SkipListMap::new();
    for k in 0..20 {
        map.insert(k, k % 5);
    }

    assert!(map.contains_value(&4));
    assert!(!map.contains_value(&5));

    assert_eq!(map.remove_if(|_, v| *v == 0), 4);
    assert_eq!(map.len(), 16);
    assert!(!map.contains_value(&0));

    let mut sum = 0;
    map.for_each(|k, _| sum += k);
    assert_eq!(sum, (0..20).filter(|k| k % 5 != 0).sum::<u32>());

    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.iter().count(), 0);
}

/// Test range views on the map, including nested and descending ones
pub fn test_sub_map_views<G: Guard>() {
    let map: SkipListMap<i32, i32, G> = SkipListMap::new();
    for k in 1..=10 {
        map.insert(k, k);
    }

    let tail = map.tail_map(5, true);
    assert_eq!(tail.first_key(), Some(5));
    assert_eq!(tail.insert(3, 3), Err(MapError::KeyOutOfRange));
    assert_eq!(tail.insert(11, 11), Ok(None));
    assert_eq!(map.last_key(), Some(11));

    let head = map.head_map(4, false);
    assert_eq!(head.keys().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(head.last_entry(), Some((3, 3)));

    let sub = map.sub_map(2, false, 8, true).expect("valid range");
    assert_eq!(sub.len(), 6);
    assert_eq!(sub.floor_key(&100), Some(8));
    assert_eq!(sub.ceiling_key(&-100), Some(3));
    assert!(!sub.contains_key(&2));

    let desc = sub.descending_map();
    assert_eq!(desc.keys().collect::<Vec<_>>(), vec![8, 7, 6, 5, 4, 3]);
    assert_eq!(desc.first_key(), Some(8));
    assert_eq!(desc.descending_keys().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7, 8]);

    // Views are live
    map.insert(6, 60);
    assert_eq!(sub.get(&6), Some(60));
    map.remove(&7);
    assert_eq!(desc.higher_key(&8), Some(6));

    assert_eq!(map.sub_map(8, true, 2, true).err(), Some(MapError::InvalidRange));
    assert_eq!(sub.tail_map(1, true).err(), Some(MapError::KeyOutOfRange));

    let whole = map.descending_map();
    assert_eq!(whole.first_key(), map.last_key());
    assert_eq!(whole.poll_first_entry(), Some((11, 11)));
}

/// Ascending and descending iteration agree with each other
pub fn test_iteration_order<G: Guard>() {
    let map: SkipListMap<u64, u64, G> = SkipListMap::new();
    let keys: Vec<u64> = (0..500).map(|i| (i * 7919) % 1000).collect();
    for &k in &keys {
        map.insert(k, k + 1);
    }

    let ascending: Vec<u64> = map.keys().collect();
    assert!(ascending.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ascending.len(), keys.len());

    let mut descending: Vec<u64> = map.descending_keys().collect();
    descending.reverse();
    assert_eq!(ascending, descending);

    let values: Vec<u64> = map.values().collect();
    assert_eq!(values, ascending.iter().map(|k| k + 1).collect::<Vec<_>>());
}

/// The map orders keys by its comparator, not by `Ord`
pub fn test_custom_comparator<G: Guard>() {
    let map: SkipListMap<String, usize, G, _> = SkipListMap::with_comparator(|a: &String, b: &String| {
        a.len().cmp(&b.len()).then_with(|| b.cmp(a))
    });

    for word in ["pear", "fig", "banana", "kiwi", "apple"] {
        map.insert(word.to_string(), word.len());
    }

    let keys: Vec<String> = map.keys().collect();
    assert_eq!(keys, vec!["fig", "pear", "kiwi", "apple", "banana"]);
    assert_eq!(map.comparator()(&"ab".to_string(), &"abc".to_string()), Ordering::Less);
    assert_eq!(map.ceiling_key(&"zzzz".to_string()), Some("pear".to_string()));
}

/// Test concurrent insertions from multiple threads: no lost updates
pub fn test_concurrent_inserts<G: Guard + 'static>(threads: usize, per_thread: usize) {
    let map: Arc<SkipListMap<usize, usize, G>> = Arc::new(SkipListMap::new());

    let handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..per_thread {
                    // interleave the partitions
                    let key = i * threads + thread_id;
                    assert_eq!(map.insert(key, thread_id), None);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), threads * per_thread);
    for key in 0..threads * per_thread {
        assert_eq!(map.get(&key), Some(key % threads), "missing key {}", key);
    }
}
