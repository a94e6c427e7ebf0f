//! Error types for the instance cache.

use thiserror::Error;

/// Errors surfaced by [`InstanceCache`](crate::InstanceCache) queries.
///
/// Eviction and disposal never fail; only lookups that need a tracked key
/// can.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No partition tracks the key.
    #[error("No instance cached for key: {0}")]
    UnknownKey(String),

    /// The instance dropped its load subscription without ever loading.
    #[error("Instance for key {0} was released before it loaded")]
    LoadAbandoned(String),
}
