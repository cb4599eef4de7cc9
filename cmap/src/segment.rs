use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use log::warn;
use parking_lot::Mutex;

use crate::bucket::Bucket;
use crate::error::Result;
use crate::pair::Pair;
use crate::redistributor::PairRedistributor;

/// One independently locked shard of the map.
///
/// The mutex guards the redistributor and serializes every structural change
/// of this shard. Lookups only pin an epoch and never take the lock.
pub(crate) struct Segment<V, R> {
    buckets: Atomic<Vec<Bucket<V>>>,
    redistributor: Mutex<R>,
    total: AtomicU64,
}

impl<V, R> Segment<V, R> {
    pub(crate) fn new(bucket_num: usize, redistributor: R) -> Self {
        let buckets = (0..bucket_num.max(1)).map(|_| Bucket::new()).collect();
        Self {
            buckets: Atomic::new(buckets),
            redistributor: Mutex::new(redistributor),
            total: AtomicU64::new(0),
        }
    }

    fn buckets<'g>(&'g self, guard: &'g Guard) -> &'g [Bucket<V>] {
        // SAFETY: the array is never null and replaced arrays are retired
        // through the epoch collector.
        unsafe { self.buckets.load(Ordering::Acquire, guard).deref() }
    }

    fn bucket_for<'g>(buckets: &'g [Bucket<V>], hash: u64) -> &'g Bucket<V> {
        &buckets[(hash % buckets.len() as u64) as usize]
    }

    pub(crate) fn get_with_hash<'g>(
        &'g self,
        key: &str,
        hash: u64,
        guard: &'g Guard,
    ) -> Option<&'g Pair<V>> {
        Self::bucket_for(self.buckets(guard), hash).get(key, guard)
    }

    pub(crate) fn len(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets(&epoch::pin()).len()
    }
}

impl<V, R> Segment<V, R>
where
    V: Clone + Send + 'static,
    R: PairRedistributor<V>,
{
    /// `map_total` is bumped alongside the segment counter, under the same
    /// lock, so a concurrent `clear` never sees one without the other.
    pub(crate) fn put(&self, pair: Pair<V>, map_total: &AtomicU64) -> Result<bool> {
        let mut redistributor = self.redistributor.lock();
        let guard = &epoch::pin();

        let buckets = self.buckets(guard);
        let bucket = Self::bucket_for(buckets, pair.hash());
        let added = bucket.put(Some(pair), None)?;
        if added {
            let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
            map_total.fetch_add(1, Ordering::AcqRel);
            self.redistribute(&mut redistributor, total, bucket.size(), buckets, guard);
        }
        Ok(added)
    }

    pub(crate) fn delete(&self, key: &str, hash: u64, map_total: &AtomicU64) -> bool {
        let mut redistributor = self.redistributor.lock();
        let guard = &epoch::pin();

        let buckets = self.buckets(guard);
        let bucket = Self::bucket_for(buckets, hash);
        let deleted = bucket.delete(key, None);
        if deleted {
            let total = self.total.fetch_sub(1, Ordering::AcqRel) - 1;
            map_total.fetch_sub(1, Ordering::AcqRel);
            self.redistribute(&mut redistributor, total, bucket.size(), buckets, guard);
        }
        deleted
    }

    /// Removes every pair, returning how many were counted in this segment.
    pub(crate) fn clear(&self, map_total: &AtomicU64) -> u64 {
        let _locked = self.redistributor.lock();
        let guard = &epoch::pin();

        for bucket in self.buckets(guard) {
            bucket.clear(None);
        }
        let removed = self.total.swap(0, Ordering::AcqRel);
        map_total.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    /// Must be called with the segment lock held.
    fn redistribute(
        &self,
        redistributor: &mut R,
        pair_total: u64,
        bucket_size: u64,
        buckets: &[Bucket<V>],
        guard: &Guard,
    ) {
        redistributor.update_threshold(pair_total, buckets.len());
        let status = redistributor.check_bucket_status(pair_total, bucket_size);
        let Some(resized) = redistributor.redistribute(status, buckets) else {
            return;
        };
        if resized.is_empty() {
            warn!("redistributor returned no buckets, keeping {} buckets", buckets.len());
            return;
        }

        let old = self.buckets.swap(Owned::new(resized), Ordering::AcqRel, guard);
        // SAFETY: the old array is unreachable from this segment now; readers
        // that loaded it before the swap keep it alive through their guards.
        unsafe { guard.defer_destroy(old) };
    }
}

impl<V, R> Drop for Segment<V, R> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader can still hold this array.
        unsafe {
            let buckets = self.buckets.load(Ordering::Relaxed, epoch::unprotected());
            drop(buckets.into_owned());
        }
    }
}
