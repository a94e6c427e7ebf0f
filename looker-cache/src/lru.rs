//! Recency-ordered cache bounded by an entry count and a byte budget.
//!
//! Both budgets are evaluated jointly on every insertion: the least recently
//! used entries are evicted until the new entry fits under both limits. The
//! cache never disposes anything itself; evicted entries are handed back to
//! the caller, which owns the disposal policy (destroying rendering
//! instances, cleaning up frame overlays, ...).
//!
//! A limit of `0` disables that budget.

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// LRU cache with a maximum entry count and a maximum cumulative size.
#[derive(Debug)]
pub struct BoundedLru<K, V> {
    /// Maximum number of resident entries (0 = unlimited).
    max_entries: usize,
    /// Maximum cumulative size in bytes (0 = unlimited).
    max_bytes: usize,
    /// Current cumulative size in bytes.
    current_bytes: usize,
    /// Recency order: most recently used at the front.
    order: VecDeque<K>,
    /// Value and size recorded at insertion.
    entries: HashMap<K, (V, usize)>,
    /// Entries evicted to satisfy a budget since creation.
    eviction_count: u64,
}

impl<K, V> BoundedLru<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache with the given budgets.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            current_bytes: 0,
            order: VecDeque::new(),
            entries: HashMap::new(),
            eviction_count: 0,
        }
    }

    /// Configured entry budget.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Configured byte budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Sum of the sizes of all resident entries.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Number of entries evicted to satisfy a budget.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check for a key without touching recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Look up a value and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Look up a value without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Size recorded for a resident key.
    pub fn size_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|(_, size)| *size)
    }

    /// Insert `value` as the most recently used entry.
    ///
    /// Returns every entry that left the cache as a result, least recently
    /// used first: a replaced value for the same key, then budget victims.
    /// An entry larger than the whole byte budget is not retained and is
    /// returned as well.
    pub fn insert(&mut self, key: K, value: V, size_bytes: usize) -> Vec<(K, V)> {
        let mut evicted = Vec::new();

        if let Some(old) = self.remove(&key) {
            evicted.push((key.clone(), old));
        }

        if self.max_bytes > 0 && size_bytes > self.max_bytes {
            self.eviction_count += 1;
            evicted.push((key, value));
            return evicted;
        }

        while self.over_budget(1, size_bytes) {
            match self.evict_lru() {
                Some(victim) => evicted.push(victim),
                None => break,
            }
        }

        self.order.push_front(key.clone());
        self.entries.insert(key, (value, size_bytes));
        self.current_bytes += size_bytes;

        evicted
    }

    /// Remove a key without counting it as an eviction.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (value, size) = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| <K as Borrow<Q>>::borrow(k) == key) {
            self.order.remove(pos);
        }
        self.current_bytes = self.current_bytes.saturating_sub(size);
        Some(value)
    }

    /// Remove every entry, least recently used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(key) = self.order.pop_back() {
            if let Some((value, _)) = self.entries.remove(&key) {
                drained.push((key, value));
            }
        }
        self.current_bytes = 0;
        drained
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    fn over_budget(&self, extra_entries: usize, extra_bytes: usize) -> bool {
        let too_many =
            self.max_entries > 0 && self.entries.len() + extra_entries > self.max_entries;
        let too_big = self.max_bytes > 0 && self.current_bytes + extra_bytes > self.max_bytes;
        too_many || too_big
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let victim = self.order.pop_back()?;
        let (value, size) = self.entries.remove(&victim)?;
        self.current_bytes = self.current_bytes.saturating_sub(size);
        self.eviction_count += 1;
        Some((victim, value))
    }

    fn touch<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(pos) = self.order.iter().position(|k| <K as Borrow<Q>>::borrow(k) == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_front(k);
            }
        }
    }
}
