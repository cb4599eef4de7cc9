use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;

use crate::error::{CmapError, Result};
use crate::pair::Pair;

/// One hash slot holding a singly linked chain of pairs.
///
/// The head is a single atomic slot; a null head is the empty marker.
/// Publishing a new head is the only moment a structural change becomes
/// visible to readers, and published nodes are never relinked: removal
/// copies the prefix in front of the removed pair and shares the suffix.
///
/// Mutators accept an optional lock. Pass `None` when an equivalent lock is
/// already held by the caller, such as the owning segment's mutex.
pub struct Bucket<V> {
    head: Atomic<Pair<V>>,
    size: AtomicU64,
}

impl<V> Default for Bucket<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Bucket<V> {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            size: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Head of the current chain, `None` for an empty bucket.
    pub fn first_pair<'g>(&'g self, guard: &'g Guard) -> Option<&'g Pair<V>> {
        self.iter(guard).next()
    }

    /// Walks one snapshot of the chain, starting at the current head.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, V> {
        Iter::starting_at(self.head.load(Ordering::Acquire, guard), guard)
    }

    /// Lock-free lookup.
    pub fn get<'g>(&'g self, key: &str, guard: &'g Guard) -> Option<&'g Pair<V>> {
        self.iter(guard).find(|pair| pair.key() == key)
    }
}

impl<V: Clone + Send + 'static> Bucket<V> {
    /// Inserts `pair`, or updates the element of the pair with the same key.
    ///
    /// Returns `true` only when a new key was linked into the chain.
    pub fn put(&self, pair: Option<Pair<V>>, lock: Option<&Mutex<()>>) -> Result<bool> {
        let pair = pair.ok_or_else(|| CmapError::illegal_parameter("pair is none"))?;
        let _locked = lock.map(Mutex::lock);
        let guard = &epoch::pin();

        let mut pair = Owned::new(pair);
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            if let Some(existing) = Iter::starting_at(head, guard).find(|p| p.key() == pair.key()) {
                existing.adopt_element(&pair, guard);
                return Ok(false);
            }

            pair.set_next(head);
            match self
                .head
                .compare_exchange(head, pair, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.size.fetch_add(1, Ordering::AcqRel);
                    return Ok(true);
                }
                Err(err) => pair = err.new,
            }
        }
    }

    /// Removes the pair stored under `key`. Returns whether it existed.
    pub fn delete(&self, key: &str, lock: Option<&Mutex<()>>) -> bool {
        let _locked = lock.map(Mutex::lock);
        let guard = &epoch::pin();

        loop {
            let head = self.head.load(Ordering::Acquire, guard);

            let mut prefix = Vec::new();
            let mut cursor = head;
            let (target, suffix) = loop {
                // SAFETY: nodes loaded under `guard` stay alive while it is held.
                match unsafe { cursor.as_ref() } {
                    None => return false,
                    Some(pair) if pair.key() == key => break (cursor, pair.next_shared(guard)),
                    Some(pair) => {
                        prefix.push(cursor);
                        cursor = pair.next_shared(guard);
                    }
                }
            };

            let mut rebuilt = suffix;
            for node in prefix.iter().rev() {
                // SAFETY: every prefix node was loaded under `guard`.
                let copy = Owned::new(unsafe { node.deref() }.copy(guard));
                copy.set_next(rebuilt);
                rebuilt = copy.into_shared(guard);
            }

            match self
                .head
                .compare_exchange(head, rebuilt, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.size.fetch_sub(1, Ordering::AcqRel);
                    // SAFETY: the replaced prefix and the target are no longer
                    // reachable from the published head.
                    unsafe {
                        for node in prefix {
                            guard.defer_destroy(node);
                        }
                        guard.defer_destroy(target);
                    }
                    return true;
                }
                Err(_) => {
                    // SAFETY: the copies were never published.
                    unsafe { Self::drop_unpublished(rebuilt, prefix.len(), guard) };
                }
            }
        }
    }

    /// Empties the bucket.
    pub fn clear(&self, lock: Option<&Mutex<()>>) {
        let _locked = lock.map(Mutex::lock);
        let guard = &epoch::pin();

        let mut cursor = self.head.swap(Shared::null(), Ordering::AcqRel, guard);
        self.size.store(0, Ordering::Release);
        // SAFETY: the detached chain is reachable only by readers that pinned
        // before the swap, and destruction waits for them.
        while let Some(pair) = unsafe { cursor.as_ref() } {
            let next = pair.next_shared(guard);
            unsafe { guard.defer_destroy(cursor) };
            cursor = next;
        }
    }

    /// Frees the first `count` nodes of a chain that was never published.
    unsafe fn drop_unpublished<'g>(mut cursor: Shared<'g, Pair<V>>, count: usize, guard: &'g Guard) {
        for _ in 0..count {
            let next = cursor.deref().next_shared(guard);
            drop(cursor.into_owned());
            cursor = next;
        }
    }
}

impl<V> Drop for Bucket<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader can hold this bucket, and every
        // node reachable from the head belongs to this chain alone.
        unsafe {
            let guard = epoch::unprotected();
            let mut cursor = self.head.load(Ordering::Relaxed, guard);
            while let Some(pair) = cursor.as_ref() {
                let next = pair.next_shared(guard);
                drop(cursor.into_owned());
                cursor = next;
            }
        }
    }
}

impl<V: fmt::Debug> fmt::Display for Bucket<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        f.write_str("[ ")?;
        for pair in self.iter(&guard) {
            write!(f, "{pair} ")?;
        }
        f.write_str("]")
    }
}

/// Iterator over one snapshot of a bucket chain.
pub struct Iter<'g, V> {
    current: Option<&'g Pair<V>>,
    guard: &'g Guard,
}

impl<'g, V> Iter<'g, V> {
    fn starting_at(head: Shared<'g, Pair<V>>, guard: &'g Guard) -> Self {
        Self {
            // SAFETY: `head` was loaded under `guard`.
            current: unsafe { head.as_ref() },
            guard,
        }
    }
}

impl<'g, V> Iterator for Iter<'g, V> {
    type Item = &'g Pair<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.current?;
        self.current = pair.next(self.guard);
        Some(pair)
    }
}
