//! Integration tests for the instance cache.
//!
//! These drive the cache through the public API with a mock instance whose
//! load notification is fired by hand:
//! - Loading promotes pending instances into hidden
//! - Hidden budgets hold after every operation
//! - No instance is ever destroyed twice
//! - Partitions stay mutually exclusive under arbitrary operation sequences

use looker_cache::{CacheError, CacheHooks, CacheLimits, InstanceCache, Partition, RenderInstance};
use looker_common::{LoadCallback, LoadSignal, SubscriptionId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockInstance {
    signal: LoadSignal,
    size: usize,
    destroyed: AtomicUsize,
}

impl MockInstance {
    fn unloaded(size: usize) -> Arc<Self> {
        Arc::new(Self {
            signal: LoadSignal::new(),
            size,
            destroyed: AtomicUsize::new(0),
        })
    }

    fn loaded(size: usize) -> Arc<Self> {
        let instance = Self::unloaded(size);
        instance.load();
        instance
    }

    fn load(&self) {
        self.signal.fire();
    }

    fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl RenderInstance for MockInstance {
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

fn limits(max_hidden_items: usize, max_hidden_items_size_bytes: usize) -> CacheLimits {
    CacheLimits {
        max_hidden_items,
        max_hidden_items_size_bytes,
    }
}

fn recording_cache(
    limits: CacheLimits,
) -> (InstanceCache<MockInstance>, Arc<Mutex<Vec<String>>>) {
    let disposed = Arc::new(Mutex::new(Vec::new()));
    let sink = disposed.clone();
    let cache = InstanceCache::new(
        limits,
        CacheHooks::new().on_dispose(move |key| sink.lock().push(key.to_string())),
    );
    (cache, disposed)
}

#[test]
fn pending_instance_moves_to_hidden_on_load() {
    let cache = InstanceCache::new(limits(2, 2), CacheHooks::new());
    let instance = MockInstance::unloaded(1);

    cache.set("a", instance.clone());
    let stats = cache.stats();
    assert_eq!(stats.shown, 1);
    assert!(cache.is_shown("a"));

    cache.hide(Some("a"));
    let stats = cache.stats();
    assert_eq!(stats.shown, 0);
    assert_eq!(stats.pending, 1);
    assert_eq!(cache.partitions_of("a"), vec![Partition::Pending]);

    instance.load();
    let stats = cache.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.hidden, 1);
    assert_eq!(stats.hidden_size_bytes, 1);
    assert_eq!(cache.partitions_of("a"), vec![Partition::Hidden]);
    assert_eq!(instance.signal.listener_count(), 0);
}

#[test]
fn eviction_honours_both_budgets() {
    let (cache, disposed) = recording_cache(limits(4, 10));

    for (key, size) in [("a", 4), ("b", 4), ("c", 1)] {
        cache.set(key, MockInstance::loaded(size));
        cache.hide(Some(key));
    }
    assert_eq!(cache.stats().hidden_size_bytes, 9);

    // Byte budget forces out "a" while the count budget still has room.
    cache.set("d", MockInstance::loaded(2));
    cache.hide(Some("d"));
    let stats = cache.stats();
    assert_eq!(stats.hidden, 3);
    assert_eq!(stats.hidden_size_bytes, 7);
    assert_eq!(*disposed.lock(), vec!["a".to_string()]);

    cache.set("e", MockInstance::loaded(1));
    cache.hide(Some("e"));
    assert_eq!(cache.stats().evictions, 1);

    // Count budget forces out "b" with bytes to spare.
    cache.set("f", MockInstance::loaded(1));
    cache.hide(Some("f"));
    let stats = cache.stats();
    assert_eq!(stats.hidden, 4);
    assert!(stats.hidden_size_bytes <= 10);
    assert_eq!(*disposed.lock(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(stats.evictions, 2);
}

#[test]
fn oversized_instance_is_disposed_on_hide() {
    let (cache, disposed) = recording_cache(limits(5, 10));
    let huge = MockInstance::loaded(11);
    cache.set("huge", huge.clone());
    cache.hide(Some("huge"));
    assert_eq!(huge.destroy_count(), 1);
    assert_eq!(*disposed.lock(), vec!["huge".to_string()]);
    assert!(cache.get("huge").is_none());
}

#[test]
fn evicted_key_is_not_destroyed_twice_by_delete() {
    let cache = InstanceCache::new(limits(1, 100), CacheHooks::new());
    let first = MockInstance::loaded(1);
    let second = MockInstance::loaded(1);

    cache.set("a", first.clone());
    cache.hide(Some("a"));
    cache.set("b", second.clone());
    cache.hide(Some("b"));
    assert_eq!(first.destroy_count(), 1);

    cache.delete();
    assert_eq!(first.destroy_count(), 1);
    assert_eq!(second.destroy_count(), 1);
}

#[test]
fn shown_instances_are_never_evicted() {
    let cache = InstanceCache::new(limits(1, 1), CacheHooks::new());
    let shown: Vec<_> = (0..5).map(|_| MockInstance::loaded(1)).collect();
    for (i, instance) in shown.iter().enumerate() {
        cache.set(format!("shown-{i}"), instance.clone());
    }
    cache.set("hidden-0", MockInstance::loaded(1));
    cache.hide(Some("hidden-0"));
    cache.set("hidden-1", MockInstance::loaded(1));
    cache.hide(Some("hidden-1"));

    assert!(shown.iter().all(|instance| instance.destroy_count() == 0));
    assert_eq!(cache.stats().shown, 5);
}

#[test]
fn hidden_then_shown_is_never_destroyed() {
    let (cache, disposed) = recording_cache(limits(1, 100));
    let a = MockInstance::loaded(1);
    cache.set("a", a.clone());
    cache.hide(Some("a"));
    cache.show("a");
    assert_eq!(cache.partitions_of("a"), vec![Partition::Shown]);

    let others: Vec<_> = ["b", "c", "d"]
        .into_iter()
        .map(|key| {
            let instance = MockInstance::loaded(1);
            cache.set(key, instance.clone());
            cache.hide(Some(key));
            instance
        })
        .collect();

    assert_eq!(a.destroy_count(), 0);
    assert!(cache.is_shown("a"));
    assert_eq!(others.iter().map(|i| i.destroy_count()).sum::<usize>(), 2);
    assert_eq!(*disposed.lock(), vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn freeze_and_unfreeze_round_trip_through_hidden() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    let loaded = MockInstance::loaded(3);
    let unloaded = MockInstance::unloaded(4);
    cache.set("loaded", loaded.clone());
    cache.set("unloaded", unloaded.clone());

    cache.freeze();
    let stats = cache.stats();
    assert_eq!((stats.shown, stats.frozen), (0, 2));
    assert!(Arc::ptr_eq(&cache.get("loaded").unwrap(), &loaded));

    cache.unfreeze();
    assert_eq!(cache.partitions_of("loaded"), vec![Partition::Hidden]);
    assert_eq!(cache.partitions_of("unloaded"), vec![Partition::Pending]);

    unloaded.load();
    let stats = cache.stats();
    assert_eq!((stats.hidden, stats.pending, stats.frozen), (2, 0, 0));
    assert_eq!(stats.hidden_size_bytes, 7);
}

#[test]
fn hide_all_hides_every_shown_key() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    for key in ["a", "b", "c"] {
        cache.set(key, MockInstance::loaded(1));
    }
    cache.hide(None);
    let stats = cache.stats();
    assert_eq!(stats.shown, 0);
    assert_eq!(stats.hidden, 3);
}

#[test]
fn load_after_set_replacement_is_ignored() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    let stale = MockInstance::unloaded(1);
    let fresh = MockInstance::loaded(1);
    cache.set("a", stale.clone());
    cache.hide(Some("a"));
    cache.set("a", fresh.clone());

    stale.load();
    assert_eq!(cache.partitions_of("a"), vec![Partition::Shown]);
    assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &fresh));
    assert_eq!(stale.destroy_count(), 1);
}

#[tokio::test]
async fn size_of_waits_for_load() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    let instance = MockInstance::unloaded(42);
    cache.set("video", instance.clone());

    let loader = instance.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        loader.load();
    });

    let size = tokio::time::timeout(Duration::from_secs(5), cache.size_of("video"))
        .await
        .expect("size_of should resolve after load");
    assert_eq!(size, Ok(42));
}

#[tokio::test]
async fn cancelled_size_of_releases_load_subscription() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    let instance = MockInstance::unloaded(7);
    cache.set("a", instance.clone());

    for _ in 0..5 {
        let waited = tokio::time::timeout(Duration::from_millis(5), cache.size_of("a")).await;
        assert!(waited.is_err());
    }
    assert_eq!(instance.signal.listener_count(), 0);

    cache.delete();
    assert_eq!(instance.signal.listener_count(), 0);
    assert_eq!(instance.destroy_count(), 1);
}

#[tokio::test]
async fn size_of_on_loaded_instance_leaves_no_listener() {
    let cache = InstanceCache::new(limits(10, 100), CacheHooks::new());
    let instance = MockInstance::loaded(3);
    cache.set("a", instance.clone());
    assert_eq!(cache.size_of("a").await, Ok(3));
    assert_eq!(instance.signal.listener_count(), 0);
}

#[tokio::test]
async fn size_of_unknown_key() {
    let cache: InstanceCache<MockInstance> = InstanceCache::new(limits(1, 1), CacheHooks::new());
    assert_eq!(
        cache.size_of("missing").await,
        Err(CacheError::UnknownKey("missing".to_string()))
    );
}

#[derive(Debug, Clone)]
enum Op {
    SetNew { key: u8, size: usize, loaded: bool },
    SetSame(u8),
    Hide(u8),
    HideAll,
    Show(u8),
    Load(u8),
    Get(u8),
    Freeze,
    Unfreeze,
    Empty,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = 0u8..5;
    prop_oneof![
        (key.clone(), 1usize..4, any::<bool>())
            .prop_map(|(key, size, loaded)| Op::SetNew { key, size, loaded }),
        key.clone().prop_map(Op::SetSame),
        key.clone().prop_map(Op::Hide),
        Just(Op::HideAll),
        key.clone().prop_map(Op::Show),
        key.clone().prop_map(Op::Load),
        key.prop_map(Op::Get),
        Just(Op::Freeze),
        Just(Op::Unfreeze),
        Just(Op::Empty),
    ]
}

proptest! {
    #[test]
    fn partitions_stay_exclusive(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let cache = InstanceCache::new(limits(3, 5), CacheHooks::new());
        let mut instances: HashMap<u8, Arc<MockInstance>> = HashMap::new();
        let mut all: Vec<Arc<MockInstance>> = Vec::new();

        for op in ops {
            match op {
                Op::SetNew { key, size, loaded } => {
                    let instance = if loaded {
                        MockInstance::loaded(size)
                    } else {
                        MockInstance::unloaded(size)
                    };
                    cache.set(key.to_string(), instance.clone());
                    instances.insert(key, instance.clone());
                    all.push(instance);
                }
                Op::SetSame(key) => {
                    if let Some(instance) = instances.get(&key) {
                        if instance.destroy_count() == 0 {
                            cache.set(key.to_string(), instance.clone());
                        }
                    }
                }
                Op::Hide(key) => cache.hide(Some(key.to_string().as_str())),
                Op::HideAll => cache.hide(None),
                Op::Show(key) => cache.show(&key.to_string()),
                Op::Load(key) => {
                    if let Some(instance) = instances.get(&key) {
                        instance.load();
                    }
                }
                Op::Get(key) => {
                    let _ = cache.get(&key.to_string());
                }
                Op::Freeze => cache.freeze(),
                Op::Unfreeze => cache.unfreeze(),
                Op::Empty => cache.empty(),
            }

            for key in 0u8..5 {
                prop_assert!(cache.partitions_of(&key.to_string()).len() <= 1);
            }
            let stats = cache.stats();
            prop_assert!(stats.hidden <= 3);
            prop_assert!(stats.hidden_size_bytes <= 5);
            for instance in &all {
                prop_assert!(instance.destroy_count() <= 1);
            }
        }
    }
}
