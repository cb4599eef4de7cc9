use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cmap::{ConcurrentMap, DEFAULT_BUCKET_NUM};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spawns `n` readers that keep asserting every stable key is visible
/// until `done` is set.
fn spawn_readers(
    map: &Arc<ConcurrentMap<u64>>,
    stable: &Arc<Vec<String>>,
    done: &Arc<AtomicBool>,
    n: usize,
) -> Vec<thread::JoinHandle<u64>> {
    (0..n)
        .map(|_| {
            let map = Arc::clone(map);
            let stable = Arc::clone(stable);
            let done = Arc::clone(done);
            thread::spawn(move || {
                let mut reads = 0;
                while !done.load(Ordering::Acquire) {
                    for (i, key) in stable.iter().enumerate() {
                        assert_eq!(map.get(key), Some(i as u64), "lost stable key {key}");
                        reads += 1;
                    }
                }
                reads
            })
        })
        .collect()
}

#[test]
fn deletes_never_hide_other_keys() {
    init_logger();
    // A single segment puts every key in the same shard.
    let map = Arc::new(ConcurrentMap::new(1).unwrap());
    let stable: Arc<Vec<String>> = Arc::new((0..200).map(|i| format!("stable_{i}")).collect());
    for (i, key) in stable.iter().enumerate() {
        map.put(key.clone(), i as u64).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let readers = spawn_readers(&map, &stable, &done, 4);

    for round in 0..50u64 {
        for i in 0..200 {
            map.put(format!("churn_{i}"), round).unwrap();
        }
        for i in 0..200 {
            assert!(map.delete(&format!("churn_{i}")));
        }
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(map.len(), 200);
}

#[test]
fn redistribution_does_not_block_readers() {
    init_logger();
    let map = Arc::new(ConcurrentMap::new(1).unwrap());
    let stable: Arc<Vec<String>> = Arc::new((0..50).map(|i| format!("stable_{i}")).collect());
    for (i, key) in stable.iter().enumerate() {
        map.put(key.clone(), i as u64).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let readers = spawn_readers(&map, &stable, &done, 2);

    for i in 0..20_000u64 {
        map.put(format!("load_{i}"), i).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }

    let stats = map.segment_stats();
    assert!(stats[0].bucket_count > DEFAULT_BUCKET_NUM);
    assert_eq!(map.len(), 20_050);
    for i in (0..20_000u64).step_by(7) {
        assert_eq!(map.get(&format!("load_{i}")), Some(i));
    }
}

#[test]
fn writers_on_many_shards() {
    init_logger();
    let map = Arc::new(ConcurrentMap::new(64).unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..2000u64 {
                    let key = format!("key_{t}_{i}");
                    assert!(map.put(key.clone(), i).unwrap());
                    if i % 2 == 0 {
                        assert!(map.delete(&key));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), 8 * 1000);
    let segment_total: u64 = map.segment_stats().iter().map(|s| s.len).sum();
    assert_eq!(segment_total, map.len());
    for t in 0..8u64 {
        for i in 0..2000u64 {
            let expected = (i % 2 == 1).then_some(i);
            assert_eq!(map.get(&format!("key_{t}_{i}")), expected);
        }
    }
}

#[test]
fn racing_updates_keep_one_value() {
    init_logger();
    let map = Arc::new(ConcurrentMap::new(4).unwrap());
    map.put("shared", 0u64).unwrap();

    let handles: Vec<_> = (1..=8u64)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    assert!(!map.put("shared", t * 10_000 + i).unwrap());
                    assert!(map.get("shared").is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), 1);
    let last = map.get("shared").unwrap();
    assert_eq!(last % 10_000, 999);
}

#[test]
fn clear_against_writers_keeps_len_bounded() {
    init_logger();
    let map = Arc::new(ConcurrentMap::new(4).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    const WRITERS: u64 = 3;
    const KEYS: u64 = 500;

    let writers: Vec<_> = (0..WRITERS)
        .map(|t| {
            let map = Arc::clone(&map);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut i = 0u64;
                while !done.load(Ordering::Acquire) {
                    map.put(format!("key_{t}_{}", i % KEYS), i).unwrap();
                    if i % 3 == 0 {
                        map.delete(&format!("key_{t}_{}", (i / 3) % KEYS));
                    }
                    i += 1;
                }
            })
        })
        .collect();

    let observer = {
        let map = Arc::clone(&map);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut max_len = 0;
            while !done.load(Ordering::Acquire) {
                max_len = max_len.max(map.len());
            }
            max_len
        })
    };

    for _ in 0..20_000 {
        map.clear();
        assert!(map.len() <= WRITERS * KEYS);
    }
    done.store(true, Ordering::Release);

    for writer in writers {
        writer.join().unwrap();
    }
    let max_len = observer.join().unwrap();
    assert!(max_len <= WRITERS * KEYS, "len reached {max_len}");

    let segment_total: u64 = map.segment_stats().iter().map(|s| s.len).sum();
    assert_eq!(segment_total, map.len());

    map.clear();
    assert_eq!(map.len(), 0);
    assert!(map.is_empty());
}
