//! Caching primitives for the Looker media engine.
//!
//! - [`InstanceCache`] tracks rendering instances across four mutually
//!   exclusive partitions (shown, pending, hidden, frozen) and evicts hidden
//!   instances under a dual count / byte budget.
//! - [`BoundedLru`] is the underlying recency-ordered store. The frame
//!   stream coordinator reuses it for its frame cache.
//!
//! # Example
//!
//! ```no_run
//! use looker_cache::{CacheHooks, CacheLimits, InstanceCache, RenderInstance};
//! # use looker_common::{LoadCallback, SubscriptionId};
//! # use std::sync::Arc;
//! # struct Viewer;
//! # impl RenderInstance for Viewer {
//! #     fn destroy(&self) {}
//! #     fn size_bytes_estimate(&self) -> usize { 1 }
//! #     fn is_loaded(&self) -> bool { true }
//! #     fn subscribe_load(&self, _: LoadCallback) -> SubscriptionId { 0 }
//! #     fn unsubscribe_load(&self, _: SubscriptionId) {}
//! # }
//!
//! let cache = InstanceCache::new(
//!     CacheLimits { max_hidden_items: 510, max_hidden_items_size_bytes: 1 << 30 },
//!     CacheHooks::new().on_dispose(|key| tracing::debug!(key, "disposed")),
//! );
//! cache.set("sample-1", Arc::new(Viewer));
//! cache.hide(Some("sample-1"));
//! assert!(cache.get("sample-1").is_some());
//! ```

pub mod errors;
pub mod instance_cache;
pub mod lru;

pub use errors::CacheError;
pub use instance_cache::{
    CacheHooks, CacheLimits, InstanceCache, InstanceCacheStats, KeyCallback, Partition,
    RenderInstance,
};
pub use lru::BoundedLru;
