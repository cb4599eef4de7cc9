//! A sharded, thread-safe map from `String` keys to arbitrary values.
//!
//! Keys are routed to one of a fixed number of segments. Each segment
//! serializes its writes behind its own mutex, while lookups never lock:
//! bucket chains are copy-on-write and published with a single atomic head
//! swap, so a reader always walks a complete, possibly stale, chain. Every
//! segment grows its bucket array on its own as a [`PairRedistributor`]
//! decides.

pub mod bucket;
pub mod error;
pub mod hash;
pub mod map;
pub mod pair;
pub mod redistributor;
mod segment;

pub use bucket::Bucket;
pub use error::{CmapError, Result};
pub use hash::{BkdrBuildHasher, BkdrHasher};
pub use map::{default_shard_amount, ConcurrentMap, SegmentStats};
pub use pair::Pair;
pub use redistributor::{BucketStatus, DefaultPairRedistributor, PairRedistributor};

pub const DEFAULT_BUCKET_LOAD_FACTOR: f64 = 0.75;
pub const DEFAULT_BUCKET_NUM: usize = 16;
pub const DEFAULT_BUCKET_MAX_SIZE: u64 = 1000;

pub const MAX_CONCURRENCY: usize = 65536;
