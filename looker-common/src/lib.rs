//! Common types shared by the Looker engine crates.
//!
//! This crate provides the vocabulary used across the cache, worker and
//! client crates:
//! - [`SampleId`] - identity of a sample / media item
//! - [`FrameNumber`] and [`FrameRange`] - 1-based video frame addressing
//! - [`LoadSignal`] - explicit load subscription for rendering instances

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A 1-based video frame number.
pub type FrameNumber = u32;

/// Identity of a sample (media item) in a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    /// Create a new sample id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SampleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An inclusive range of frame numbers, `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: FrameNumber,
    pub end: FrameNumber,
}

impl FrameRange {
    /// Create a new range.
    pub const fn new(start: FrameNumber, end: FrameNumber) -> Self {
        Self { start, end }
    }

    /// The first chunk of a stream anchored at `start`.
    ///
    /// The end is clamped to `frame_count`.
    pub fn chunk_at(start: FrameNumber, chunk_size: u32, frame_count: FrameNumber) -> Self {
        let end = start
            .saturating_add(chunk_size.max(1) - 1)
            .min(frame_count.max(start));
        Self { start, end }
    }

    /// The chunk following this one, or `None` once `frame_count` is covered.
    pub fn next_chunk(&self, chunk_size: u32, frame_count: FrameNumber) -> Option<Self> {
        if self.end >= frame_count {
            return None;
        }
        Some(Self::chunk_at(self.end + 1, chunk_size, frame_count))
    }

    /// Check if a frame falls within this range.
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame >= self.start && frame <= self.end
    }

    /// Number of frames covered by the range.
    pub const fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// True if the range covers no frames.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Handle returned by a load subscription.
pub type SubscriptionId = u64;

/// Callback invoked once when a load notification fires.
pub type LoadCallback = Box<dyn FnOnce() + Send>;

/// One-shot load notification with explicit subscribe / unsubscribe.
///
/// Rendering instances embed a `LoadSignal` and call [`LoadSignal::fire`]
/// once their size becomes known (first frame or image decoded). Callbacks
/// are invoked after the internal lock is released, so a callback may
/// subscribe or unsubscribe again without deadlocking.
#[derive(Default)]
pub struct LoadSignal {
    loaded: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, LoadCallback)>>,
}

impl LoadSignal {
    /// Create a signal in the not-loaded state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once [`fire`](Self::fire) has been called.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Register a callback for the next load notification.
    pub fn subscribe(&self, callback: LoadCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.lock().push((id, callback));
        id
    }

    /// Remove a callback. Returns false if it already fired or was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|(sub, _)| *sub == id) {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of callbacks waiting for the next notification.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Mark the owner as loaded and notify every subscriber.
    pub fn fire(&self) {
        self.loaded.store(true, Ordering::Release);
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for (_, callback) in listeners {
            callback();
        }
    }
}

impl fmt::Debug for LoadSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadSignal")
            .field("loaded", &self.is_loaded())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
