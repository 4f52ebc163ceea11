// Stress tests for SkipListMap under contention.
//
// Every test here is generic over the reclamation guard so the same scenarios
// run against DeferredGuard (coral-core) and EpochGuard (coral-crossbeam).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use crate::data_structures::SkipListMap;
use crate::guard::Guard;

type Map<G> = SkipListMap<u64, u64, G>;

/// Threads insert disjoint key ranges while removing keys from the next
/// thread's range. Afterwards the map holds exactly the keys never removed.
pub fn test_disjoint_insert_delete<G: Guard + 'static>(threads: usize, per_thread: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    let barrier = Arc::new(Barrier::new(threads));
    let start = Instant::now();

    let handles: Vec<_> = (0..threads as u64)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let base = thread_id * per_thread;
                let victim = ((thread_id + 1) % threads as u64) * per_thread;
                let mut removed = Vec::new();
                barrier.wait();

                for i in 0..per_thread {
                    assert_eq!(map.insert(base + i, thread_id), None);
                    if i % 3 == 0 {
                        let key = victim + i;
                        if map.remove(&key).is_some() {
                            removed.push(key);
                        }
                    }
                }
                removed
            })
        })
        .collect();

    let mut removed = HashSet::new();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert!(removed.insert(key), "key {} removed twice", key);
        }
    }

    let total = threads as u64 * per_thread;
    assert_eq!(map.len() as u64, total - removed.len() as u64);

    let keys: Vec<u64> = map.keys().collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "scan out of order");
    for key in 0..total {
        assert_eq!(map.contains_key(&key), !removed.contains(&key), "key {}", key);
    }

    println!(
        "disjoint insert/delete: {} threads x {} keys, {} removed, {:?}",
        threads,
        per_thread,
        removed.len(),
        start.elapsed()
    );
}

/// All threads race put_if_absent on the same keys: exactly one wins each key.
pub fn test_put_if_absent_race<G: Guard + 'static>(threads: usize, keys: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    let barrier = Arc::new(Barrier::new(threads));
    let winners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads as u64)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                barrier.wait();
                for key in 0..keys {
                    if map.put_if_absent(key, thread_id).is_none() {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::Relaxed) as u64, keys);
    assert_eq!(map.len() as u64, keys);
}

/// All threads try to remove the same keys: exactly one succeeds per key.
pub fn test_remove_same_keys<G: Guard + 'static>(threads: usize, keys: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    for key in 0..keys {
        map.insert(key, key);
    }
    let barrier = Arc::new(Barrier::new(threads));
    let removed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let removed = Arc::clone(&removed);
            thread::spawn(move || {
                barrier.wait();
                for key in 0..keys {
                    if map.remove(&key).is_some() {
                        removed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(removed.load(Ordering::Relaxed) as u64, keys);
    assert!(map.is_empty());
}

/// Threads drain the map from both ends; every entry is taken exactly once.
pub fn test_concurrent_poll<G: Guard + 'static>(threads: usize, keys: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    for key in 0..keys {
        map.insert(key, key * 2);
    }
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut taken = Vec::new();
                loop {
                    let entry = if thread_id % 2 == 0 {
                        map.poll_first_entry()
                    } else {
                        map.poll_last_entry()
                    };
                    match entry {
                        Some((k, v)) => {
                            assert_eq!(v, k * 2);
                            taken.push(k);
                        }
                        None => break,
                    }
                }
                taken
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert!(seen.insert(key), "key {} polled twice", key);
        }
    }
    assert_eq!(seen.len() as u64, keys);
    assert!(map.is_empty());
}

/// Readers scan while writers churn; every scan stays strictly ascending and
/// never yields a value that does not belong to its key.
pub fn test_scans_during_churn<G: Guard + 'static>(writers: usize, readers: usize, ops: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    let done = Arc::new(AtomicBool::new(false));
    let scans = Arc::new(AtomicUsize::new(0));

    let writer_handles: Vec<_> = (0..writers as u64)
        .map(|writer_id| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..ops {
                    let key = (i * 31 + writer_id * 7) % 512;
                    if i % 2 == 0 {
                        map.insert(key, key * 3);
                    } else {
                        map.remove(&key);
                    }
                }
            })
        })
        .collect();

    let reader_handles: Vec<_> = (0..readers)
        .map(|reader_id| {
            let map = Arc::clone(&map);
            let done = Arc::clone(&done);
            let scans = Arc::clone(&scans);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let entries: Vec<(u64, u64)> = if reader_id % 2 == 0 {
                        map.iter().collect()
                    } else {
                        let mut entries: Vec<(u64, u64)> = map.descending_iter().collect();
                        entries.reverse();
                        entries
                    };
                    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
                    assert!(entries.iter().all(|(k, v)| *v == k * 3));
                    scans.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in writer_handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for handle in reader_handles {
        handle.join().unwrap();
    }

    let keys: Vec<u64> = map.keys().collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(keys.len(), map.len());
    println!("scans completed during churn: {}", scans.load(Ordering::Relaxed));
}

/// Concurrent merges on a handful of counters never lose an increment.
pub fn test_merge_counters<G: Guard + 'static>(threads: usize, increments: u64) {
    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..increments {
                    map.merge(i % 4, 1, |old, add| Some(old + add));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total: u64 = map.values().sum();
    assert_eq!(total, threads as u64 * increments);
    println!("merge counters: {:?}", map.iter().collect::<Vec<_>>());
}

/// Threads hand a single key around through conditional operations. Every
/// successful step moves the value from `v` to `v + 1`, either in place with
/// `replace_if_equals` or by `remove_if_equals` followed by `put_if_absent`
/// from the thread that won the removal. Each value must be produced by
/// exactly one thread and the final value counts every step.
pub fn test_single_key_transitions<G: Guard + 'static>(threads: usize, attempts: u64) {
    const KEY: u64 = 0;

    let map: Arc<Map<G>> = Arc::new(SkipListMap::new());
    map.insert(KEY, 0);
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut produced = Vec::new();
                barrier.wait();

                for i in 0..attempts {
                    // absent while another thread holds it between remove and put
                    let Some(current) = map.get(&KEY) else {
                        continue;
                    };
                    if i % 8 == 0 {
                        if map.remove_if_equals(&KEY, &current) {
                            assert_eq!(map.put_if_absent(KEY, current + 1), None);
                            produced.push(current + 1);
                        }
                    } else if map.replace_if_equals(&KEY, &current, current + 1) {
                        produced.push(current + 1);
                    }
                }
                produced
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for value in handle.join().unwrap() {
            assert!(seen.insert(value), "value {} produced twice", value);
        }
    }

    let steps = seen.len() as u64;
    assert_eq!(map.get(&KEY), Some(steps));
    assert!((1..=steps).all(|v| seen.contains(&v)), "a step was skipped");
    assert_eq!(map.len(), 1);
    println!("single key transitions: {} threads, {} steps", threads, steps);
}
