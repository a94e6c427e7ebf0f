//! Exclusionary cache of rendering instances.
//!
//! Every tracked key lives in exactly one of four partitions:
//!
//! - **shown**: on screen, never evicted
//! - **pending**: hidden, but its size is not known yet; waits for the
//!   instance's load notification
//! - **hidden**: hidden with a known size, held in a [`BoundedLru`] bounded
//!   by entry count and cumulative bytes
//! - **frozen**: parked outside both shown and hidden bookkeeping
//!
//! Disposal (`destroy()` followed by the `on_dispose` hook), hook calls and
//! load unsubscriptions run after the partition lock is released, so they
//! may safely call back into the cache.

use crate::errors::CacheError;
use crate::lru::BoundedLru;
use looker_common::{LoadCallback, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A rendering instance tracked by the cache.
///
/// Instances are built by the viewing surface; the cache only tracks their
/// lifecycle. Load callbacks must not be invoked from inside
/// [`subscribe_load`](Self::subscribe_load).
pub trait RenderInstance: Send + Sync + 'static {
    /// Release every resource held by the instance.
    fn destroy(&self);

    /// Estimated memory footprint in bytes. Only meaningful once loaded.
    fn size_bytes_estimate(&self) -> usize;

    /// True once the instance's size can be determined.
    fn is_loaded(&self) -> bool;

    /// Register a callback for the load notification.
    fn subscribe_load(&self, callback: LoadCallback) -> SubscriptionId;

    /// Cancel a load subscription. A no-op for subscriptions that already
    /// fired or were cancelled.
    fn unsubscribe_load(&self, subscription: SubscriptionId);
}

/// Budgets for the hidden partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of hidden instances.
    pub max_hidden_items: usize,
    /// Maximum cumulative size estimate of hidden instances.
    pub max_hidden_items_size_bytes: usize,
}

/// Callback receiving a cache key.
pub type KeyCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Side-effect callbacks invoked by the cache.
#[derive(Clone, Default)]
pub struct CacheHooks {
    on_set: Option<KeyCallback>,
    on_dispose: Option<KeyCallback>,
}

impl CacheHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every [`InstanceCache::set`].
    #[must_use]
    pub fn on_set(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_set = Some(Arc::new(callback));
        self
    }

    /// Called after an instance has been destroyed by the cache.
    #[must_use]
    pub fn on_dispose(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_dispose = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for CacheHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHooks")
            .field("on_set", &self.on_set.is_some())
            .field("on_dispose", &self.on_dispose.is_some())
            .finish()
    }
}

/// The partition a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Frozen,
    Hidden,
    Pending,
    Shown,
}

/// Snapshot of partition sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCacheStats {
    pub shown: usize,
    pub pending: usize,
    pub hidden: usize,
    pub frozen: usize,
    /// Cumulative size estimate of the hidden partition.
    pub hidden_size_bytes: usize,
    /// Hidden entries evicted to satisfy a budget since creation.
    pub evictions: u64,
}

struct PendingEntry<I> {
    instance: Arc<I>,
    /// Distinguishes successive pending stints of the same key.
    ticket: u64,
    subscription: Option<SubscriptionId>,
}

/// Work deferred until the partition lock is released.
enum Effect<I> {
    Dispose { key: String, instance: Arc<I> },
    Destroy(Arc<I>),
    Unsubscribe { instance: Arc<I>, subscription: SubscriptionId },
    Set(String),
}

struct Partitions<I> {
    frozen: HashMap<String, Arc<I>>,
    hidden: BoundedLru<String, Arc<I>>,
    pending: HashMap<String, PendingEntry<I>>,
    shown: HashMap<String, Arc<I>>,
    next_ticket: u64,
}

impl<I: RenderInstance> Partitions<I> {
    fn new(limits: CacheLimits) -> Self {
        Self {
            frozen: HashMap::new(),
            hidden: BoundedLru::new(limits.max_hidden_items, limits.max_hidden_items_size_bytes),
            pending: HashMap::new(),
            shown: HashMap::new(),
            next_ticket: 0,
        }
    }

    fn take_pending(&mut self, key: &str, effects: &mut Vec<Effect<I>>) -> Option<Arc<I>> {
        let entry = self.pending.remove(key)?;
        if let Some(subscription) = entry.subscription {
            effects.push(Effect::Unsubscribe {
                instance: entry.instance.clone(),
                subscription,
            });
        }
        Some(entry.instance)
    }

    /// Remove a key from frozen, hidden and pending.
    fn take_parked(&mut self, key: &str, effects: &mut Vec<Effect<I>>) -> Option<Arc<I>> {
        if let Some(instance) = self.frozen.remove(key) {
            return Some(instance);
        }
        if let Some(instance) = self.hidden.remove(key) {
            return Some(instance);
        }
        self.take_pending(key, effects)
    }

    fn insert_hidden(&mut self, key: String, instance: Arc<I>, effects: &mut Vec<Effect<I>>) {
        if self.hidden.contains(key.as_str()) {
            return;
        }
        let size = instance.size_bytes_estimate();
        trace!(key = %key, size, "Hiding instance");
        for (victim_key, victim) in self.hidden.insert(key, instance, size) {
            if self.shown.contains_key(&victim_key) {
                trace!(key = %victim_key, "Skipping disposal of re-shown instance");
                continue;
            }
            debug!(key = %victim_key, "Evicting hidden instance");
            effects.push(Effect::Dispose {
                key: victim_key,
                instance: victim,
            });
        }
    }

    fn stats(&self) -> InstanceCacheStats {
        InstanceCacheStats {
            shown: self.shown.len(),
            pending: self.pending.len(),
            hidden: self.hidden.len(),
            frozen: self.frozen.len(),
            hidden_size_bytes: self.hidden.current_bytes(),
            evictions: self.hidden.eviction_count(),
        }
    }
}

/// Load subscription released when dropped.
struct LoadSubscriptionGuard<'a, I: RenderInstance> {
    instance: &'a I,
    subscription: SubscriptionId,
}

impl<I: RenderInstance> Drop for LoadSubscriptionGuard<'_, I> {
    fn drop(&mut self) {
        self.instance.unsubscribe_load(self.subscription);
    }
}

struct Inner<I> {
    partitions: Mutex<Partitions<I>>,
    hooks: CacheHooks,
    limits: CacheLimits,
}

impl<I: RenderInstance> Inner<I> {
    fn apply(&self, effects: Vec<Effect<I>>) {
        for effect in effects {
            match effect {
                Effect::Dispose { key, instance } => {
                    instance.destroy();
                    if let Some(on_dispose) = &self.hooks.on_dispose {
                        on_dispose(&key);
                    }
                }
                Effect::Destroy(instance) => instance.destroy(),
                Effect::Unsubscribe {
                    instance,
                    subscription,
                } => instance.unsubscribe_load(subscription),
                Effect::Set(key) => {
                    if let Some(on_set) = &self.hooks.on_set {
                        on_set(&key);
                    }
                }
            }
        }
    }

    /// Move a pending entry into hidden, if it is still the same pending stint.
    fn promote_pending(&self, key: &str, ticket: u64) {
        let mut effects = Vec::new();
        {
            let mut partitions = self.partitions.lock();
            match partitions.pending.get(key) {
                Some(entry) if entry.ticket == ticket => {}
                _ => return,
            }
            if let Some(instance) = partitions.take_pending(key, &mut effects) {
                partitions.insert_hidden(key.to_string(), instance, &mut effects);
            }
        }
        self.apply(effects);
    }
}

/// Cache of rendering instances keyed by sample / media key.
///
/// Cloning yields another handle to the same cache.
pub struct InstanceCache<I> {
    inner: Arc<Inner<I>>,
}

impl<I> Clone for InstanceCache<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: RenderInstance> InstanceCache<I> {
    /// Create an empty cache.
    pub fn new(limits: CacheLimits, hooks: CacheHooks) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: Mutex::new(Partitions::new(limits)),
                hooks,
                limits,
            }),
        }
    }

    /// Configured hidden budgets.
    pub fn limits(&self) -> CacheLimits {
        self.inner.limits
    }

    /// Track `instance` as shown under `key`.
    ///
    /// The key leaves every other partition. Nothing is evicted.
    pub fn set(&self, key: impl Into<String>, instance: Arc<I>) {
        let key = key.into();
        let mut effects = Vec::new();
        {
            let mut partitions = self.inner.partitions.lock();
            let previous = partitions
                .take_parked(&key, &mut effects)
                .or_else(|| partitions.shown.remove(&key));
            if let Some(previous) = previous {
                if !Arc::ptr_eq(&previous, &instance) {
                    // The replaced instance is no longer reachable from the cache.
                    effects.push(Effect::Destroy(previous));
                }
            }
            partitions.shown.insert(key.clone(), instance);
            effects.push(Effect::Set(key));
        }
        self.inner.apply(effects);
    }

    /// Look up an instance in frozen, hidden, pending, then shown.
    ///
    /// A hit in hidden marks the entry most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<I>> {
        let mut partitions = self.inner.partitions.lock();
        if let Some(instance) = partitions.frozen.get(key) {
            return Some(instance.clone());
        }
        if let Some(instance) = partitions.hidden.get(key) {
            return Some(instance.clone());
        }
        if let Some(entry) = partitions.pending.get(key) {
            return Some(entry.instance.clone());
        }
        partitions.shown.get(key).cloned()
    }

    /// Hide one key, or every shown key when `key` is `None`.
    pub fn hide(&self, key: Option<&str>) {
        match key {
            Some(key) => self.hide_one(key),
            None => {
                let keys: Vec<String> = self.inner.partitions.lock().shown.keys().cloned().collect();
                for key in keys {
                    self.hide_one(&key);
                }
            }
        }
    }

    /// Promote any tracked instance for `key` into shown.
    pub fn show(&self, key: &str) {
        let mut effects = Vec::new();
        {
            let mut partitions = self.inner.partitions.lock();
            if let Some(instance) = partitions.take_parked(key, &mut effects) {
                trace!(key, "Showing instance");
                partitions.shown.insert(key.to_string(), instance);
            }
        }
        self.inner.apply(effects);
    }

    /// Move every shown instance into frozen.
    pub fn freeze(&self) {
        let mut partitions = self.inner.partitions.lock();
        let shown = std::mem::take(&mut partitions.shown);
        debug!(count = shown.len(), "Freezing shown instances");
        partitions.frozen.extend(shown);
    }

    /// Send every frozen instance back through the hide pipeline.
    pub fn unfreeze(&self) {
        let keys: Vec<String> = self.inner.partitions.lock().frozen.keys().cloned().collect();
        debug!(count = keys.len(), "Unfreezing instances");
        for key in keys {
            self.hide_one(&key);
        }
    }

    /// Dispose every hidden and pending instance.
    pub fn empty(&self) {
        let mut effects = Vec::new();
        {
            let mut partitions = self.inner.partitions.lock();
            for (key, instance) in partitions.hidden.drain() {
                if partitions.shown.contains_key(&key) {
                    continue;
                }
                effects.push(Effect::Dispose { key, instance });
            }
            let pending: Vec<String> = partitions.pending.keys().cloned().collect();
            for key in pending {
                if let Some(instance) = partitions.take_pending(&key, &mut effects) {
                    effects.push(Effect::Dispose { key, instance });
                }
            }
        }
        self.inner.apply(effects);
    }

    /// Dispose every tracked instance and clear all partitions.
    pub fn delete(&self) {
        let mut effects = Vec::new();
        {
            let mut partitions = self.inner.partitions.lock();
            let pending: Vec<String> = partitions.pending.keys().cloned().collect();
            for key in pending {
                if let Some(instance) = partitions.take_pending(&key, &mut effects) {
                    effects.push(Effect::Dispose { key, instance });
                }
            }
            for (key, instance) in partitions.hidden.drain() {
                effects.push(Effect::Dispose { key, instance });
            }
            for (key, instance) in partitions.frozen.drain() {
                effects.push(Effect::Dispose { key, instance });
            }
            for (key, instance) in partitions.shown.drain() {
                effects.push(Effect::Dispose { key, instance });
            }
        }
        debug!(count = effects.len(), "Deleting instance cache");
        self.inner.apply(effects);
    }

    pub fn is_shown(&self, key: &str) -> bool {
        self.inner.partitions.lock().shown.contains_key(key)
    }

    /// Size estimate of an instance, waiting for its load notification if
    /// it has not loaded yet.
    pub async fn size_of(&self, key: &str) -> Result<usize, CacheError> {
        let instance = self
            .peek(key)
            .ok_or_else(|| CacheError::UnknownKey(key.to_string()))?;
        if instance.is_loaded() {
            return Ok(instance.size_bytes_estimate());
        }

        let (tx, rx) = flume::bounded(1);
        let subscription = instance.subscribe_load(Box::new(move || {
            let _ = tx.send(());
        }));
        // Unsubscribes on every exit, including when this future is dropped.
        let _guard = LoadSubscriptionGuard {
            instance: instance.as_ref(),
            subscription,
        };
        if instance.is_loaded() {
            return Ok(instance.size_bytes_estimate());
        }

        rx.recv_async()
            .await
            .map_err(|_| CacheError::LoadAbandoned(key.to_string()))?;
        Ok(instance.size_bytes_estimate())
    }

    /// Every partition currently holding `key`.
    ///
    /// Partitions are exclusive, so this holds at most one element.
    pub fn partitions_of(&self, key: &str) -> Vec<Partition> {
        let partitions = self.inner.partitions.lock();
        let mut found = Vec::new();
        if partitions.frozen.contains_key(key) {
            found.push(Partition::Frozen);
        }
        if partitions.hidden.contains(key) {
            found.push(Partition::Hidden);
        }
        if partitions.pending.contains_key(key) {
            found.push(Partition::Pending);
        }
        if partitions.shown.contains_key(key) {
            found.push(Partition::Shown);
        }
        found
    }

    pub fn stats(&self) -> InstanceCacheStats {
        self.inner.partitions.lock().stats()
    }

    fn peek(&self, key: &str) -> Option<Arc<I>> {
        let partitions = self.inner.partitions.lock();
        partitions
            .frozen
            .get(key)
            .or_else(|| partitions.hidden.peek(key))
            .or_else(|| partitions.pending.get(key).map(|entry| &entry.instance))
            .or_else(|| partitions.shown.get(key))
            .cloned()
    }

    fn hide_one(&self, key: &str) {
        let mut effects = Vec::new();
        let (instance, ticket) = {
            let mut partitions = self.inner.partitions.lock();
            let Some(instance) = partitions
                .shown
                .remove(key)
                .or_else(|| partitions.frozen.remove(key))
            else {
                return;
            };

            if instance.is_loaded() {
                partitions.insert_hidden(key.to_string(), instance, &mut effects);
                drop(partitions);
                self.inner.apply(effects);
                return;
            }

            partitions.next_ticket += 1;
            let ticket = partitions.next_ticket;
            trace!(key, ticket, "Instance pending load");
            partitions.pending.insert(
                key.to_string(),
                PendingEntry {
                    instance: instance.clone(),
                    ticket,
                    subscription: None,
                },
            );
            (instance, ticket)
        };

        // Subscribe outside the lock; the callback re-enters the cache.
        let weak = Arc::downgrade(&self.inner);
        let callback_key = key.to_string();
        let subscription = instance.subscribe_load(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.promote_pending(&callback_key, ticket);
            }
        }));

        let still_pending = {
            let mut partitions = self.inner.partitions.lock();
            match partitions.pending.get_mut(key) {
                Some(entry) if entry.ticket == ticket => {
                    entry.subscription = Some(subscription);
                    true
                }
                _ => false,
            }
        };

        if !still_pending {
            instance.unsubscribe_load(subscription);
        } else if instance.is_loaded() {
            // Loaded between the check above and the subscription.
            self.inner.promote_pending(key, ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looker_common::LoadSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestInstance {
        signal: LoadSignal,
        size: usize,
        destroyed: AtomicUsize,
    }

    impl TestInstance {
        fn new(size: usize) -> Arc<Self> {
            Arc::new(Self {
                signal: LoadSignal::new(),
                size,
                destroyed: AtomicUsize::new(0),
            })
        }

        fn loaded(size: usize) -> Arc<Self> {
            let instance = Self::new(size);
            instance.signal.fire();
            instance
        }
    }

    impl RenderInstance for TestInstance {
        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn size_bytes_estimate(&self) -> usize {
            self.size
        }

        fn is_loaded(&self) -> bool {
            self.signal.is_loaded()
        }

        fn subscribe_load(&self, callback: LoadCallback) -> SubscriptionId {
            self.signal.subscribe(callback)
        }

        fn unsubscribe_load(&self, subscription: SubscriptionId) {
            self.signal.unsubscribe(subscription);
        }
    }

    fn cache(max_items: usize, max_bytes: usize) -> InstanceCache<TestInstance> {
        InstanceCache::new(
            CacheLimits {
                max_hidden_items: max_items,
                max_hidden_items_size_bytes: max_bytes,
            },
            CacheHooks::new(),
        )
    }

    #[test]
    fn test_get_priority_and_hidden_recency() {
        let cache = cache(2, 100);
        let a = TestInstance::loaded(1);
        let b = TestInstance::loaded(1);
        cache.set("a", a.clone());
        cache.set("b", b);
        cache.hide(Some("a"));
        cache.hide(Some("b"));

        // Touch "a" so "b" becomes least recently used.
        assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &a));
        cache.set("c", TestInstance::loaded(1));
        cache.hide(Some("c"));

        assert_eq!(cache.partitions_of("a"), vec![Partition::Hidden]);
        assert!(cache.partitions_of("b").is_empty());
        assert_eq!(a.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hide_is_idempotent_for_hidden() {
        let cache = cache(4, 100);
        cache.set("a", TestInstance::loaded(10));
        cache.hide(Some("a"));
        cache.hide(Some("a"));
        let stats = cache.stats();
        assert_eq!(stats.hidden, 1);
        assert_eq!(stats.hidden_size_bytes, 10);
    }

    #[test]
    fn test_set_replacing_distinct_instance_destroys_old() {
        let cache = cache(4, 100);
        let old = TestInstance::loaded(1);
        cache.set("a", old.clone());
        cache.hide(Some("a"));
        cache.set("a", TestInstance::loaded(1));
        assert_eq!(old.destroyed.load(Ordering::SeqCst), 1);
        assert!(cache.is_shown("a"));
    }

    #[test]
    fn test_set_same_instance_does_not_destroy() {
        let cache = cache(4, 100);
        let a = TestInstance::loaded(1);
        cache.set("a", a.clone());
        cache.hide(Some("a"));
        cache.set("a", a.clone());
        assert_eq!(a.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(cache.partitions_of("a"), vec![Partition::Shown]);
    }

    #[test]
    fn test_show_cancels_pending_subscription() {
        let cache = cache(4, 100);
        let a = TestInstance::new(1);
        cache.set("a", a.clone());
        cache.hide(Some("a"));
        assert_eq!(a.signal.listener_count(), 1);

        cache.show("a");
        assert_eq!(a.signal.listener_count(), 0);

        // A late load must not drag the instance into hidden.
        a.signal.fire();
        assert_eq!(cache.partitions_of("a"), vec![Partition::Shown]);
    }

    #[test]
    fn test_empty_disposes_hidden_and_pending() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let sink = disposed.clone();
        let cache = InstanceCache::new(
            CacheLimits {
                max_hidden_items: 4,
                max_hidden_items_size_bytes: 100,
            },
            CacheHooks::new().on_dispose(move |key| sink.lock().push(key.to_string())),
        );
        let shown = TestInstance::loaded(1);
        cache.set("hidden", TestInstance::loaded(1));
        cache.set("pending", TestInstance::new(1));
        cache.set("shown", shown.clone());
        cache.hide(Some("hidden"));
        cache.hide(Some("pending"));

        cache.empty();

        let mut keys = disposed.lock().clone();
        keys.sort();
        assert_eq!(keys, vec!["hidden".to_string(), "pending".to_string()]);
        assert!(cache.is_shown("shown"));
        assert_eq!(shown.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().pending, 0);
    }

    #[test]
    fn test_delete_disposes_everything() {
        let cache = cache(4, 100);
        let instances: Vec<_> = (0..4).map(|_| TestInstance::loaded(1)).collect();
        cache.set("frozen", instances[0].clone());
        cache.freeze();
        cache.set("shown", instances[1].clone());
        cache.set("hidden", instances[2].clone());
        cache.hide(Some("hidden"));
        cache.set("other", instances[3].clone());

        cache.delete();

        for instance in &instances {
            assert_eq!(instance.destroyed.load(Ordering::SeqCst), 1);
        }
        assert_eq!(cache.stats(), InstanceCacheStats::default());
    }

    #[test]
    fn test_on_set_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cache = InstanceCache::new(
            CacheLimits {
                max_hidden_items: 1,
                max_hidden_items_size_bytes: 1,
            },
            CacheHooks::new().on_set(move |key| sink.lock().push(key.to_string())),
        );
        cache.set("x", TestInstance::loaded(1));
        assert_eq!(*seen.lock(), vec!["x".to_string()]);
    }
}
