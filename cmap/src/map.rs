use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crossbeam_epoch as epoch;
use crossbeam_utils::CachePadded;
use rustc_hash::FxBuildHasher;

use crate::error::{CmapError, Result};
use crate::pair::Pair;
use crate::redistributor::{DefaultPairRedistributor, PairRedistributor};
use crate::segment::Segment;
use crate::{DEFAULT_BUCKET_NUM, MAX_CONCURRENCY};

/// Shard count used by [`ConcurrentMap::default`].
pub fn default_shard_amount() -> usize {
    static DEFAULT_SHARD_AMOUNT: OnceLock<usize> = OnceLock::new();
    *DEFAULT_SHARD_AMOUNT.get_or_init(|| {
        (std::thread::available_parallelism().map_or(1, usize::from) * 4)
            .next_power_of_two()
            .min(MAX_CONCURRENCY)
    })
}

/// Entry and bucket counts of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    pub len: u64,
    pub bucket_count: usize,
}

/// A concurrent, sharded map from `String` keys to `V`.
///
/// Writes lock only the segment the key hashes to; reads are lock-free.
/// Each segment resizes its own buckets as decided by its redistributor `R`.
pub struct ConcurrentMap<V, R = DefaultPairRedistributor, S = FxBuildHasher> {
    concurrency: usize,
    segments: Box<[CachePadded<Segment<V, R>>]>,
    total: AtomicU64,
    hasher: S,
}

impl<V> ConcurrentMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a map with `concurrency` segments and the default redistributor.
    pub fn new(concurrency: usize) -> Result<Self> {
        Self::with_redistributor(concurrency, DefaultPairRedistributor::default())
    }
}

impl<V> Default for ConcurrentMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_segments(
            default_shard_amount(),
            FxBuildHasher,
            DefaultPairRedistributor::default(),
        )
    }
}

impl<V, R> ConcurrentMap<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: PairRedistributor<V> + Clone,
{
    /// Create a map whose segments each get a clone of `redistributor`.
    pub fn with_redistributor(concurrency: usize, redistributor: R) -> Result<Self> {
        Self::with_hasher_and_redistributor(concurrency, FxBuildHasher, redistributor)
    }
}

impl<V, R, S> ConcurrentMap<V, R, S>
where
    V: Clone + Send + Sync + 'static,
    R: PairRedistributor<V> + Clone,
    S: BuildHasher,
{
    /// Create a map with a custom hasher and redistributor.
    ///
    /// Fails when `concurrency` is zero or larger than [`MAX_CONCURRENCY`].
    pub fn with_hasher_and_redistributor(
        concurrency: usize,
        hasher: S,
        redistributor: R,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(CmapError::illegal_parameter(
                "concurrency must be greater than 0",
            ));
        }
        if concurrency > MAX_CONCURRENCY {
            return Err(CmapError::illegal_parameter(format!(
                "concurrency must not exceed {MAX_CONCURRENCY}"
            )));
        }
        Ok(Self::with_segments(concurrency, hasher, redistributor))
    }

    fn with_segments(concurrency: usize, hasher: S, redistributor: R) -> Self {
        let segments = (0..concurrency)
            .map(|_| CachePadded::new(Segment::new(DEFAULT_BUCKET_NUM, redistributor.clone())))
            .collect();
        Self {
            concurrency,
            segments,
            total: AtomicU64::new(0),
            hasher,
        }
    }

    /// Number of segments, fixed at construction.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn hash_key(&self, key: &str) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Index of the segment owning `hash`.
    ///
    /// Only the upper half of wide hashes is used, and multi-segment maps
    /// reduce modulo `concurrency - 1`, so the last segment stays unused.
    fn segment_index(&self, hash: u64) -> usize {
        if self.concurrency == 1 {
            return 0;
        }
        let hash32 = if hash > u64::from(u32::MAX) {
            (hash >> 32) as u32
        } else {
            hash as u32
        };
        (hash32 >> 16) as usize % (self.concurrency - 1)
    }

    fn find_segment(&self, hash: u64) -> &Segment<V, R> {
        &self.segments[self.segment_index(hash)]
    }

    /// Insert or update `key`. Returns `true` only for a key that was absent.
    pub fn put(&self, key: impl Into<String>, value: V) -> Result<bool> {
        let key = key.into();
        let hash = self.hash_key(&key);
        self.find_segment(hash).put(Pair::new(key, hash, value), &self.total)
    }

    /// Get a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with(key, V::clone)
    }

    /// Apply `f` to the value stored under `key` without cloning it.
    pub fn get_with<T>(&self, key: &str, f: impl FnOnce(&V) -> T) -> Option<T> {
        let hash = self.hash_key(key);
        let guard = epoch::pin();
        self.find_segment(hash)
            .get_with_hash(key, hash, &guard)
            .map(|pair| f(pair.element(&guard)))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_with(key, |_| ()).is_some()
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let hash = self.hash_key(key);
        self.find_segment(hash).delete(key, hash, &self.total)
    }

    /// Number of entries, tracked independently of the segment counters.
    ///
    /// Segments update this counter while holding their lock, so it never
    /// drops below the number of entries a concurrent `clear` removes.
    pub fn len(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, one segment at a time.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear(&self.total);
        }
    }

    /// Per-segment entry and bucket counts, for diagnostics.
    pub fn segment_stats(&self) -> Vec<SegmentStats> {
        self.segments
            .iter()
            .map(|segment| SegmentStats {
                len: segment.len(),
                bucket_count: segment.bucket_count(),
            })
            .collect()
    }
}
