use crossbeam_epoch as epoch;
use log::{debug, trace};

use crate::bucket::Bucket;
use crate::{DEFAULT_BUCKET_LOAD_FACTOR, DEFAULT_BUCKET_MAX_SIZE, DEFAULT_BUCKET_NUM};

/// Load classification of a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BucketStatus {
    Normal = 0,
    Underweight = 1,
    Overweight = 2,
}

/// Policy deciding when and how a segment resizes its bucket array.
///
/// Every segment owns its own instance, and all three methods are called
/// while the segment's lock is held.
pub trait PairRedistributor<V> {
    /// Recomputes the per-bucket size threshold.
    fn update_threshold(&mut self, pair_total: u64, bucket_num: usize);

    /// Classifies one bucket after it was mutated.
    fn check_bucket_status(&mut self, pair_total: u64, bucket_size: u64) -> BucketStatus;

    /// Returns the replacement bucket array, or `None` to keep `buckets`.
    fn redistribute(&mut self, status: BucketStatus, buckets: &[Bucket<V>])
        -> Option<Vec<Bucket<V>>>;
}

/// Doubles a segment's buckets once a quarter of them were seen overweight,
/// and halves large, mostly empty segments.
#[derive(Debug, Clone)]
pub struct DefaultPairRedistributor {
    load_factor: f64,
    upper_threshold: u64,
    overweight_bucket_count: u64,
    empty_bucket_count: u64,
}

impl Default for DefaultPairRedistributor {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_LOAD_FACTOR, DEFAULT_BUCKET_NUM)
    }
}

impl DefaultPairRedistributor {
    /// A non-positive `load_factor` falls back to the default of 0.75.
    pub fn new(load_factor: f64, bucket_num: usize) -> Self {
        let load_factor = if load_factor > 0.0 {
            load_factor
        } else {
            DEFAULT_BUCKET_LOAD_FACTOR
        };
        let mut redistributor = Self {
            load_factor,
            upper_threshold: 0,
            overweight_bucket_count: 0,
            empty_bucket_count: 0,
        };
        redistributor.set_threshold(0, bucket_num);
        redistributor
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    pub fn upper_threshold(&self) -> u64 {
        self.upper_threshold
    }

    pub fn overweight_bucket_count(&self) -> u64 {
        self.overweight_bucket_count
    }

    pub fn empty_bucket_count(&self) -> u64 {
        self.empty_bucket_count
    }

    fn set_threshold(&mut self, pair_total: u64, bucket_num: usize) {
        let average = (pair_total / bucket_num.max(1) as u64).max(100);
        self.upper_threshold = (average as f64 * self.load_factor) as u64;
    }

    fn reset_counts(&mut self) {
        self.overweight_bucket_count = 0;
        self.empty_bucket_count = 0;
    }
}

impl<V: Clone + Send + 'static> PairRedistributor<V> for DefaultPairRedistributor {
    fn update_threshold(&mut self, pair_total: u64, bucket_num: usize) {
        self.set_threshold(pair_total, bucket_num);
        trace!(
            "threshold updated: pair_total={pair_total} bucket_num={bucket_num} upper_threshold={}",
            self.upper_threshold
        );
    }

    fn check_bucket_status(&mut self, _pair_total: u64, bucket_size: u64) -> BucketStatus {
        if bucket_size > DEFAULT_BUCKET_MAX_SIZE || bucket_size >= self.upper_threshold {
            self.overweight_bucket_count += 1;
            return BucketStatus::Overweight;
        }
        if bucket_size == 0 {
            self.empty_bucket_count += 1;
        }
        BucketStatus::Normal
    }

    fn redistribute(
        &mut self,
        status: BucketStatus,
        buckets: &[Bucket<V>],
    ) -> Option<Vec<Bucket<V>>> {
        let current_number = buckets.len();
        let new_number = match status {
            BucketStatus::Overweight => {
                if self.overweight_bucket_count * 4 < current_number as u64 {
                    trace!(
                        "not growing: {} of {current_number} buckets overweight",
                        self.overweight_bucket_count
                    );
                    return None;
                }
                current_number << 1
            }
            BucketStatus::Underweight => {
                if current_number < 100 || self.empty_bucket_count * 4 < current_number as u64 {
                    return None;
                }
                (current_number >> 1).max(2)
            }
            BucketStatus::Normal => return None,
        };
        if new_number == current_number {
            self.reset_counts();
            return None;
        }

        let guard = &epoch::pin();
        let resized: Vec<Bucket<V>> = (0..new_number).map(|_| Bucket::new()).collect();
        for pair in buckets.iter().flat_map(|bucket| bucket.iter(guard)) {
            let index = (pair.hash() % new_number as u64) as usize;
            // The resized buckets are not shared yet, so no lock is needed.
            // `put` only fails for a missing pair, and keys are unique across
            // the old buckets, so the outcome carries no information here.
            let _ = resized[index].put(Some(pair.copy(guard)), None);
        }

        debug!("redistributed {status:?} segment: {current_number} -> {new_number} buckets");
        self.reset_counts();
        Some(resized)
    }
}
