use std::fmt;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Shared};

/// One key/value entry, and one node of a bucket chain.
///
/// `key` and `hash` never change after construction. `element` and `next`
/// are single atomic slots so that lock-free readers observe either the old
/// or the new value, never a torn one.
pub struct Pair<V> {
    key: String,
    hash: u64,
    element: Atomic<V>,
    next: Atomic<Pair<V>>,
}

impl<V> Pair<V> {
    pub fn new(key: impl Into<String>, hash: u64, element: V) -> Self {
        Self {
            key: key.into(),
            hash,
            element: Atomic::new(element),
            next: Atomic::null(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Current element of this pair.
    pub fn element<'g>(&'g self, guard: &'g Guard) -> &'g V {
        // SAFETY: a reachable pair always carries an element, and replaced
        // elements are only destroyed once every guard that could see them
        // has been dropped.
        unsafe { self.element.load(Ordering::Acquire, guard).deref() }
    }

    /// Following pair of the chain, if any.
    pub fn next<'g>(&'g self, guard: &'g Guard) -> Option<&'g Pair<V>> {
        // SAFETY: chain nodes are retired through the epoch collector.
        unsafe { self.next.load(Ordering::Acquire, guard).as_ref() }
    }

    pub(crate) fn next_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Pair<V>> {
        self.next.load(Ordering::Acquire, guard)
    }

    /// Links this pair in front of `next`.
    ///
    /// Crate-internal: every node is owned by exactly one chain, and buckets
    /// free their chains by walking `next`. Relinking a published pair from
    /// outside a bucket could alias two chains and double free a node, so
    /// callers only link pairs that are not yet published.
    pub(crate) fn set_next(&self, next: Shared<'_, Pair<V>>) {
        self.next.store(next, Ordering::Release);
    }
}

impl<V: Send + 'static> Pair<V> {
    /// Publishes a new element, retiring the previous one.
    pub fn set_element(&self, element: V, guard: &Guard) {
        let old = self.element.swap(epoch::Owned::new(element), Ordering::AcqRel, guard);
        // SAFETY: `old` is unreachable through this pair from now on.
        unsafe { guard.defer_destroy(old) };
    }

    /// Moves the element of an unpublished `donor` into this pair.
    pub(crate) fn adopt_element(&self, donor: &Pair<V>, guard: &Guard) {
        let element = donor.element.swap(Shared::null(), Ordering::Relaxed, guard);
        let old = self.element.swap(element, Ordering::AcqRel, guard);
        // SAFETY: `old` is unreachable through this pair from now on.
        unsafe { guard.defer_destroy(old) };
    }
}

impl<V: Clone> Pair<V> {
    /// A fresh pair with the same key, hash and element and no successor.
    pub fn copy(&self, guard: &Guard) -> Pair<V> {
        Pair::new(self.key.clone(), self.hash, self.element(guard).clone())
    }
}

impl<V> Drop for Pair<V> {
    fn drop(&mut self) {
        // SAFETY: a pair is dropped only after it became unreachable, so its
        // element is no longer shared. Successors are owned by the chain,
        // not by this node.
        unsafe {
            let element = self.element.load(Ordering::Relaxed, epoch::unprotected());
            if !element.is_null() {
                drop(element.into_owned());
            }
        }
    }
}

impl<V: fmt::Debug> fmt::Display for Pair<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        write!(
            f,
            "pair{{key: {}, hash: {}, element: {:?}, next_key: {}}}",
            self.key,
            self.hash,
            self.element(&guard),
            self.next(&guard).map_or("", Pair::key)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let pair = Pair::new("key", 42, 7u32);
        let guard = epoch::pin();

        assert_eq!(pair.key(), "key");
        assert_eq!(pair.hash(), 42);
        assert_eq!(*pair.element(&guard), 7);
        assert!(pair.next(&guard).is_none());
    }

    #[test]
    fn test_set_element() {
        let pair = Pair::new("key", 1, "old".to_string());
        let guard = epoch::pin();

        pair.set_element("new".to_string(), &guard);
        assert_eq!(pair.element(&guard), "new");
        assert_eq!(pair.key(), "key");
    }

    #[test]
    fn test_copy_drops_link() {
        let guard = epoch::pin();
        let tail = epoch::Owned::new(Pair::new("tail", 2, 2u64)).into_shared(&guard);
        let head = Pair::new("head", 1, 1u64);
        head.set_next(tail);
        assert_eq!(head.next(&guard).map(Pair::key), Some("tail"));

        let copy = head.copy(&guard);
        assert_eq!(copy.key(), "head");
        assert_eq!(copy.hash(), 1);
        assert_eq!(*copy.element(&guard), 1);
        assert!(copy.next(&guard).is_none());

        // SAFETY: `tail` was never shared beyond this test.
        unsafe { drop(tail.into_owned()) };
    }

    #[test]
    fn test_display() {
        let pair = Pair::new("a", 97, 1i32);
        assert_eq!(
            pair.to_string(),
            "pair{key: a, hash: 97, element: 1, next_key: }"
        );
    }
}
