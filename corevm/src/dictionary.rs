//! The standard associative container.
//!
//! Open hashing with one singly linked chain per bucket, in the spirit of
//! Java's `HashMap`. The bucket array is allocated on the first insertion
//! and doubles whenever the item count reaches `bucket_count * load_factor`.
//!
//! Two policies are deliberate and observable through iteration order:
//! - a key's hash is computed once when it is inserted and cached in its
//!   node, resizes redistribute nodes by the cached hash
//! - the bucket array never shrinks, removing entries only unlinks nodes

use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, Hash},
    mem,
};

use crate::{Visitable, Visitor};

/// Must be a power of two.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1 << 3;
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

pub type DictionaryHash = u64;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DictionarySettings {
    /// bucket count allocated on first insertion, a power of two
    pub initial_capacity: usize,
    pub load_factor: f32,
    /// bucket count at which growth stops, a power of two
    pub maximum_capacity: usize,
}

impl Default for DictionarySettings {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            maximum_capacity: MAXIMUM_CAPACITY,
        }
    }
}

impl DictionarySettings {
    fn validate(&self) {
        assert!(
            self.initial_capacity.is_power_of_two(),
            "initial capacity {} is not a power of two",
            self.initial_capacity
        );
        assert!(
            self.maximum_capacity.is_power_of_two()
                && self.maximum_capacity >= self.initial_capacity,
            "maximum capacity {} must be a power of two >= {}",
            self.maximum_capacity,
            self.initial_capacity
        );
        assert!(
            self.load_factor.is_finite() && self.load_factor > 0.0,
            "load factor {} must be positive",
            self.load_factor
        );
        // the first bucket array has to hold at least one item
        assert!(
            self.initial_capacity as f64 * f64::from(self.load_factor) >= 1.0,
            "load factor {} leaves no room in {} buckets",
            self.load_factor,
            self.initial_capacity
        );
    }

    fn threshold_for(&self, capacity: usize) -> usize {
        if capacity >= self.maximum_capacity {
            return usize::MAX;
        }
        (capacity as f64 * f64::from(self.load_factor)) as usize
    }
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    hash: DictionaryHash,
    next: Link<K, V>,
}

type Link<K, V> = Option<Box<Node<K, V>>>;

pub struct Dictionary<K, V, S = ahash::RandomState> {
    /// `None` until the first insertion
    buckets: Option<Box<[Link<K, V>]>>,
    size: usize,
    /// size at which the next resize happens, 0 while unallocated
    threshold: usize,
    settings: DictionarySettings,
    hasher: S,
}

impl<K, V> Dictionary<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(DictionarySettings::default())
    }

    #[must_use]
    pub fn with_settings(settings: DictionarySettings) -> Self {
        Self::with_settings_and_hasher(settings, ahash::RandomState::new())
    }
}

impl<K, V> Default for Dictionary<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Dictionary<K, V, S> {
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_settings_and_hasher(DictionarySettings::default(), hasher)
    }

    #[must_use]
    pub fn with_settings_and_hasher(
        settings: DictionarySettings,
        hasher: S,
    ) -> Self {
        settings.validate();
        Self {
            buckets: None,
            size: 0,
            threshold: 0,
            settings,
            hasher,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of buckets, 0 before the first insertion.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.as_ref().map_or(0, |buckets| buckets.len())
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn settings(&self) -> &DictionarySettings {
        &self.settings
    }

    /// Drops all entries and the bucket array, the next insertion starts
    /// over with the initial capacity.
    pub fn clear(&mut self) {
        if let Some(buckets) = self.buckets.take() {
            drop_chains(buckets);
        }
        self.size = 0;
        self.threshold = 0;
    }

    /// Entries in bucket order, then chain order. The order changes when
    /// the dictionary resizes.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let buckets: &[Link<K, V>] = self.buckets.as_deref().unwrap_or(&[]);
        Iter {
            buckets: buckets.iter(),
            chain: None,
        }
    }

    /// Snapshot of all keys, see [`Dictionary::iter`] for the order.
    #[must_use]
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::with_capacity(self.size);
        keys.extend(self.iter().map(|(key, _)| key.clone()));
        keys
    }

    fn initialized_buckets(&mut self) -> &mut [Link<K, V>] {
        if self.buckets.is_none() {
            let capacity = self.settings.initial_capacity;
            self.threshold = self.settings.threshold_for(capacity);
            self.buckets = Some(empty_buckets(capacity));
        }
        self.buckets.as_deref_mut().unwrap_or_default()
    }

    /// Doubles the bucket count and redistributes all nodes by their
    /// cached hash.
    fn resize(&mut self) {
        let old_capacity = self.bucket_count();
        if old_capacity >= self.settings.maximum_capacity {
            self.threshold = usize::MAX;
            return;
        }

        let capacity = old_capacity * 2;
        let mask = capacity - 1;
        let mut buckets = empty_buckets(capacity);
        let old = self.buckets.take().unwrap_or_default();
        for mut link in old.into_vec() {
            while let Some(mut node) = link {
                link = node.next.take();
                let index = bucket_index(node.hash, mask);
                node.next = buckets[index].take();
                buckets[index] = Some(node);
            }
        }

        self.buckets = Some(buckets);
        self.threshold = self.settings.threshold_for(capacity);
        log::trace!(
            "dictionary resized {old_capacity} -> {capacity} buckets ({} items)",
            self.size
        );
    }
}

impl<K, V, S> Dictionary<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts or overwrites, returning the previous value.
    ///
    /// Insertion may allocate, so in a collected setting key and value must
    /// already be reachable from a root.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hasher.hash_one(&key);
        let buckets = self.initialized_buckets();
        let index = bucket_index(hash, buckets.len() - 1);

        let mut cursor = buckets[index].as_deref_mut();
        while let Some(node) = cursor {
            if node.hash == hash && node.key == key {
                return Some(mem::replace(&mut node.value, value));
            }
            cursor = node.next.as_deref_mut();
        }

        let next = buckets[index].take();
        buckets[index] = Some(Box::new(Node {
            key,
            value,
            hash,
            next,
        }));

        self.size += 1;
        if self.size >= self.threshold {
            self.resize();
        }
        None
    }

    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|node| &node.value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let buckets = self.buckets.as_deref_mut()?;
        let index = bucket_index(hash, buckets.len() - 1);
        let mut cursor = buckets[index].as_deref_mut();
        while let Some(node) = cursor {
            if node.hash == hash && key_matches(&node.key, key) {
                return Some(&mut node.value);
            }
            cursor = node.next.as_deref_mut();
        }
        None
    }

    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Unlinks the entry for `key`. Removing a missing key does nothing.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let buckets = self.buckets.as_deref_mut()?;
        let index = bucket_index(hash, buckets.len() - 1);

        let mut link = &mut buckets[index];
        while link
            .as_ref()
            .is_some_and(|node| node.hash != hash || !key_matches(&node.key, key))
        {
            link = &mut link.as_mut()?.next;
        }

        let mut node = link.take()?;
        *link = node.next.take();
        self.size -= 1;
        Some(node.value)
    }

    fn find<Q>(&self, key: &Q) -> Option<&Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let buckets = self.buckets.as_deref()?;
        let mut cursor = buckets[bucket_index(hash, buckets.len() - 1)].as_deref();
        while let Some(node) = cursor {
            if node.hash == hash && key_matches(&node.key, key) {
                return Some(node);
            }
            cursor = node.next.as_deref();
        }
        None
    }
}

impl<K, V, S> Drop for Dictionary<K, V, S> {
    fn drop(&mut self) {
        if let Some(buckets) = self.buckets.take() {
            drop_chains(buckets);
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for Dictionary<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Reports every key and value, a moving collector may update them in
/// place. Cached hashes are kept, so keys must hash by content, not by
/// address.
impl<K: Visitable, V: Visitable, S> Visitable for Dictionary<K, V, S> {
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        let Some(buckets) = self.buckets.as_deref_mut() else {
            return;
        };
        for bucket in buckets {
            let mut cursor = bucket.as_deref_mut();
            while let Some(node) = cursor {
                node.key.visit_edges_mut(visitor);
                node.value.visit_edges_mut(visitor);
                cursor = node.next.as_deref_mut();
            }
        }
    }
}

pub struct Iter<'a, K, V> {
    buckets: std::slice::Iter<'a, Link<K, V>>,
    chain: Option<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.chain {
                self.chain = node.next.as_deref();
                return Some((&node.key, &node.value));
            }
            self.chain = self.buckets.next()?.as_deref();
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a Dictionary<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[inline]
fn bucket_index(hash: DictionaryHash, mask: usize) -> usize {
    (hash as usize) & mask
}

#[inline]
fn key_matches<K, Q>(stored: &K, key: &Q) -> bool
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let stored: &Q = stored.borrow();
    stored == key
}

fn empty_buckets<K, V>(capacity: usize) -> Box<[Link<K, V>]> {
    (0..capacity).map(|_| None).collect()
}

// chains can get long with bad hashes, unlink iteratively instead of letting
// the boxes drop recursively
fn drop_chains<K, V>(buckets: Box<[Link<K, V>]>) {
    for mut link in buckets.into_vec() {
        while let Some(mut node) = link {
            link = node.next.take();
        }
    }
}
