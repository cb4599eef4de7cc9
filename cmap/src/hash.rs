use std::hash::{BuildHasher, Hasher};

const SEED: u64 = 13131;

/// Builds [`BkdrHasher`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BkdrBuildHasher;

impl BuildHasher for BkdrBuildHasher {
    type Hasher = BkdrHasher;

    fn build_hasher(&self) -> BkdrHasher {
        BkdrHasher::default()
    }
}

/// Multiplicative BKDR string hash (seed 13131), masked to 63 bits.
///
/// Deterministic across processes, unlike `RandomState`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BkdrHasher {
    hash: u64,
}

impl Hasher for BkdrHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.hash = self.hash.wrapping_mul(SEED).wrapping_add(u64::from(byte));
        }
    }

    fn finish(&self) -> u64 {
        self.hash & 0x7FFF_FFFF_FFFF_FFFF
    }
}
