//! Chunked frame streaming for one video at a time.
//!
//! A [`FrameStreamCoordinator`] owns at most one stream session: a
//! subscription token and one live execution context fetching chunks of
//! `chunk_size` frames. The stream is self-driving: every chunk response
//! immediately requests the next chunk until `frame_count` is covered.
//! Playback ticks call [`FrameReader::request_frames`], which either leaves
//! the stream alone, nudges it, or restarts it at a new anchor.
//!
//! Frames land in a [`BoundedLru`] scoped to the current video; evicted
//! frames have their overlays cleaned up and are reported through
//! [`FrameStreamListener::remove_frame`].
//!
//! Listener callbacks run after the coordinator lock is released.

use crate::config::FrameStreamConfig;
use crate::messages::StreamEvent;
use looker_cache::BoundedLru;
use looker_common::{FrameNumber, FrameRange, SampleId};
use looker_worker::messages::{FramePayload, StreamRequest, StreamResponse};
use looker_worker::{ExecutionContext, WorkerEvent, WorkerFactory, WorkerListener};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Decoded drawing data attached to a frame.
pub trait Overlay: Send + Sync {
    /// Memory held by the overlay in bytes.
    fn size_bytes(&self) -> usize;

    /// Release decoded resources (bitmaps, masks).
    fn cleanup(&self);
}

/// One cached video frame.
pub struct Frame {
    pub frame_number: FrameNumber,
    pub sample: serde_json::Value,
    pub overlays: Vec<Box<dyn Overlay>>,
}

impl Frame {
    /// Size charged against the frame cache byte budget. At least one byte.
    pub fn size_bytes(&self) -> usize {
        self.overlays
            .iter()
            .map(|overlay| overlay.size_bytes())
            .sum::<usize>()
            .max(1)
    }

    fn cleanup(&self) {
        for overlay in &self.overlays {
            overlay.cleanup();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("frame_number", &self.frame_number)
            .field("overlays", &self.overlays.len())
            .finish()
    }
}

/// The video player side of a stream.
pub trait FrameStreamListener: Send + Sync {
    /// Decode the overlays of a freshly received frame.
    fn load_overlays(&self, frame: &FramePayload) -> Vec<Box<dyn Overlay>>;

    /// A frame entered the frame cache.
    fn add_frame(&self, frame_number: FrameNumber, frame: Arc<Frame>);

    /// A frame was evicted from the frame cache.
    fn remove_frame(&self, frame_number: FrameNumber);

    /// A chunk covering `range` has been buffered.
    fn add_frame_buffers(&self, range: FrameRange);

    /// Whether the player currently shows a buffering indicator.
    fn is_buffering(&self) -> bool;

    /// Surface an event to the player.
    fn dispatch_event(&self, event: StreamEvent);
}

/// Describes the video to stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub active_paths: Vec<String>,
    #[serde(default)]
    pub coloring: serde_json::Value,
    #[serde(default)]
    pub customize_color_setting: serde_json::Value,
    pub dataset: String,
    /// Anchor of the first session.
    pub frame_number: FrameNumber,
    pub frame_count: FrameNumber,
    pub sample_id: SampleId,
    #[serde(default)]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub view: serde_json::Value,
    #[serde(default)]
    pub group: Option<String>,
}

/// Snapshot of coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStreamStats {
    /// Sessions started, including restarts.
    pub sessions_started: u64,
    /// Chunks accepted from the live session.
    pub chunks_received: u64,
    /// Responses dropped because their session was superseded.
    pub stale_messages: u64,
    /// Frames currently cached.
    pub frames_cached: usize,
    /// Bytes currently charged to the frame cache.
    pub frame_bytes: usize,
    /// Frames evicted to satisfy a budget.
    pub frames_evicted: u64,
}

type StreamContext = Box<dyn ExecutionContext<StreamRequest>>;
type StreamWorkerFactory = Arc<dyn WorkerFactory<StreamRequest, StreamResponse>>;

struct Session {
    subscription: Uuid,
    context: StreamContext,
    /// A chunk request is in flight.
    requesting_frames: bool,
}

#[derive(Default)]
struct StreamState {
    /// Bumped by every acquire and clear; readers from older generations are inert.
    generation: u64,
    options: Option<StreamOptions>,
    session: Option<Session>,
    /// The chunk the stream will deliver next; `None` once exhausted or failed.
    next_range: Option<FrameRange>,
    frames: Option<BoundedLru<FrameNumber, Arc<Frame>>>,
    stats: FrameStreamStats,
}

/// Listener work deferred until the lock is released.
enum Notice {
    Add(FrameNumber, Arc<Frame>),
    Remove(FrameNumber, Arc<Frame>),
    Discard(Arc<Frame>),
    Buffers(FrameRange),
    Event(StreamEvent),
    ClearBuffering,
}

struct CoordinatorInner {
    config: FrameStreamConfig,
    factory: StreamWorkerFactory,
    listener: Arc<dyn FrameStreamListener>,
    state: Mutex<StreamState>,
}

/// Owns the single active frame stream of one video player.
pub struct FrameStreamCoordinator {
    inner: Arc<CoordinatorInner>,
}

/// Request handle returned by [`FrameStreamCoordinator::acquire_reader`].
#[derive(Clone)]
pub struct FrameReader {
    inner: Arc<CoordinatorInner>,
    generation: u64,
}

impl FrameStreamCoordinator {
    pub fn new(
        config: FrameStreamConfig,
        factory: StreamWorkerFactory,
        listener: Arc<dyn FrameStreamListener>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                factory,
                listener,
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    /// Start streaming `options` at `options.frame_number` with a fresh frame
    /// cache. Any previous session is torn down first.
    pub fn acquire_reader(&self, options: StreamOptions) -> FrameReader {
        let mut notices = Vec::new();
        let generation = {
            let mut state = self.inner.state.lock();
            self.inner.teardown(&mut state, &mut notices);
            state.generation += 1;
            let anchor = options.frame_number;
            debug!(sample = %options.sample_id, anchor, frame_count = options.frame_count, "Acquiring frame reader");
            state.frames = Some(BoundedLru::new(
                self.inner.config.max_frames,
                self.inner.config.max_frame_bytes,
            ));
            state.options = Some(options);
            self.inner.restart(&mut state, anchor, &mut notices);
            state.generation
        };
        self.inner.notify(notices);
        FrameReader {
            inner: self.inner.clone(),
            generation,
        }
    }

    /// Terminate the stream and drop every cached frame. Idempotent.
    pub fn clear_reader(&self) {
        let mut notices = Vec::new();
        {
            let mut state = self.inner.state.lock();
            self.inner.teardown(&mut state, &mut notices);
            state.generation += 1;
        }
        self.inner.notify(notices);
    }

    /// Look up a cached frame, marking it recently used.
    pub fn frame(&self, frame_number: FrameNumber) -> Option<Arc<Frame>> {
        let mut state = self.inner.state.lock();
        state.frames.as_mut()?.get(&frame_number).cloned()
    }

    /// The chunk the live session will deliver next.
    pub fn next_range(&self) -> Option<FrameRange> {
        self.inner.state.lock().next_range
    }

    pub fn stats(&self) -> FrameStreamStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats;
        if let Some(frames) = &state.frames {
            stats.frames_cached = frames.len();
            stats.frame_bytes = frames.current_bytes();
            stats.frames_evicted = frames.eviction_count();
        }
        stats
    }
}

impl Drop for FrameStreamCoordinator {
    fn drop(&mut self) {
        self.clear_reader();
    }
}

impl FrameReader {
    /// Make sure frames around `frame_number` are on their way.
    ///
    /// Called on every playback or scrub tick. Never blocks on the stream;
    /// frames arrive through the listener.
    pub fn request_frames(&self, frame_number: FrameNumber) {
        let mut notices = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.generation != self.generation || state.options.is_none() {
                trace!(frame_number, "Ignoring request from released reader");
                return;
            }

            let cached = state
                .frames
                .as_ref()
                .is_some_and(|frames| frames.contains(&frame_number));

            match state.next_range {
                None => {
                    debug!(frame_number, "Stream exhausted; restarting");
                    self.inner.restart(&mut state, frame_number, &mut notices);
                }
                Some(range) if !cached && frame_number < range.start => {
                    debug!(frame_number, next = %range, "Seek behind stream cursor; restarting");
                    self.inner.restart(&mut state, frame_number, &mut notices);
                }
                Some(_) => self.inner.request_next_chunk(&mut state, &mut notices),
            }
        }
        self.inner.notify(notices);
    }
}

impl CoordinatorInner {
    /// Terminate the session and dispose the frame cache.
    fn teardown(&self, state: &mut StreamState, notices: &mut Vec<Notice>) {
        if let Some(mut session) = state.session.take() {
            debug!(subscription = %session.subscription, "Terminating stream session");
            session.context.terminate();
        }
        if let Some(mut frames) = state.frames.take() {
            notices.extend(frames.drain().into_iter().map(|(_, frame)| Notice::Discard(frame)));
        }
        state.options = None;
        state.next_range = None;
    }

    /// Replace the session with a new one anchored at `anchor`.
    fn restart(self: &Arc<Self>, state: &mut StreamState, anchor: FrameNumber, notices: &mut Vec<Notice>) {
        if let Some(mut session) = state.session.take() {
            session.context.terminate();
        }
        let Some(options) = state.options.as_ref() else {
            return;
        };

        let subscription = Uuid::new_v4();
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener: WorkerListener<StreamResponse> = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_worker_event(subscription, event);
            }
        });
        let context = self.factory.create(listener);

        let chunk_size = self.config.chunk_size;
        let request = StreamRequest::SetStream {
            subscription,
            sample_id: options.sample_id.clone(),
            dataset: options.dataset.clone(),
            view: options.view.clone(),
            group: options.group.clone(),
            frame_number: anchor,
            frame_count: options.frame_count,
            num_frames: chunk_size,
        };
        let next = FrameRange::chunk_at(anchor, chunk_size, options.frame_count);
        state.stats.sessions_started += 1;
        debug!(%subscription, anchor, next = %next, "Starting stream session");

        match context.post_message(request) {
            Ok(()) => {
                state.next_range = Some(next);
                state.session = Some(Session {
                    subscription,
                    context,
                    requesting_frames: true,
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to start stream session");
                state.next_range = None;
                state.session = Some(Session {
                    subscription,
                    context,
                    requesting_frames: false,
                });
                notices.push(Notice::Event(StreamEvent::Error {
                    message: e.to_string(),
                }));
            }
        }
    }

    /// Ask the live context for the next chunk unless one is in flight.
    fn request_next_chunk(&self, state: &mut StreamState, notices: &mut Vec<Notice>) {
        let Some(session) = state.session.as_mut() else {
            return;
        };
        if session.requesting_frames {
            return;
        }
        let request = StreamRequest::RequestFrameChunk {
            subscription: session.subscription,
        };
        match session.context.post_message(request) {
            Ok(()) => session.requesting_frames = true,
            Err(e) => {
                warn!(error = %e, "Failed to request frame chunk");
                state.next_range = None;
                notices.push(Notice::Event(StreamEvent::Error {
                    message: e.to_string(),
                }));
            }
        }
    }

    fn is_live(state: &StreamState, subscription: Uuid) -> bool {
        state
            .session
            .as_ref()
            .is_some_and(|session| session.subscription == subscription)
    }

    fn on_worker_event(self: &Arc<Self>, subscription: Uuid, event: WorkerEvent<StreamResponse>) {
        match event {
            WorkerEvent::Message(StreamResponse::FrameChunk {
                subscription: token,
                frames,
                range,
            }) => {
                if token != subscription {
                    self.state.lock().stats.stale_messages += 1;
                    return;
                }
                self.on_chunk(subscription, frames, range);
            }
            WorkerEvent::Error(e) => {
                let mut state = self.state.lock();
                if !Self::is_live(&state, subscription) {
                    state.stats.stale_messages += 1;
                    return;
                }
                warn!(%subscription, error = %e, "Frame stream failed");
                if let Some(session) = state.session.as_mut() {
                    session.requesting_frames = false;
                }
                state.next_range = None;
                drop(state);
                self.listener.dispatch_event(StreamEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn on_chunk(self: &Arc<Self>, subscription: Uuid, payloads: Vec<FramePayload>, range: FrameRange) {
        {
            let mut state = self.state.lock();
            if !Self::is_live(&state, subscription) {
                trace!(%subscription, %range, "Dropping chunk from superseded session");
                state.stats.stale_messages += 1;
                return;
            }
        }

        // Overlay decoding calls out to the player; keep it outside the lock.
        let frames: Vec<Arc<Frame>> = payloads
            .into_iter()
            .map(|payload| {
                let overlays = self.listener.load_overlays(&payload);
                Arc::new(Frame {
                    frame_number: payload.frame_number,
                    sample: payload.data,
                    overlays,
                })
            })
            .collect();

        let mut notices = Vec::new();
        {
            let mut state = self.state.lock();
            if !Self::is_live(&state, subscription) {
                state.stats.stale_messages += 1;
                drop(state);
                self.notify(frames.into_iter().map(Notice::Discard).collect());
                return;
            }
            state.stats.chunks_received += 1;
            trace!(%subscription, %range, frames = frames.len(), "Received frame chunk");

            if let Some(cache) = state.frames.as_mut() {
                for frame in frames {
                    let frame_number = frame.frame_number;
                    let size = frame.size_bytes();
                    let mut retained = true;
                    for (evicted_number, evicted) in cache.insert(frame_number, frame.clone(), size) {
                        if Arc::ptr_eq(&evicted, &frame) {
                            retained = false;
                            notices.push(Notice::Discard(evicted));
                        } else {
                            notices.push(Notice::Remove(evicted_number, evicted));
                        }
                    }
                    if retained {
                        notices.push(Notice::Add(frame_number, frame));
                    }
                }
            }
            notices.push(Notice::Buffers(range));

            let frame_count = state.options.as_ref().map_or(0, |options| options.frame_count);
            match range.next_chunk(self.config.chunk_size, frame_count) {
                Some(next) => {
                    state.next_range = Some(next);
                    if let Some(session) = state.session.as_mut() {
                        session.requesting_frames = false;
                    }
                    self.request_next_chunk(&mut state, &mut notices);
                }
                None => {
                    debug!(%subscription, "Stream complete");
                    state.next_range = None;
                    if let Some(session) = state.session.as_mut() {
                        session.requesting_frames = false;
                    }
                }
            }
            notices.push(Notice::ClearBuffering);
        }
        self.notify(notices);
    }

    fn notify(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Add(frame_number, frame) => self.listener.add_frame(frame_number, frame),
                Notice::Remove(frame_number, frame) => {
                    frame.cleanup();
                    self.listener.remove_frame(frame_number);
                }
                Notice::Discard(frame) => frame.cleanup(),
                Notice::Buffers(range) => self.listener.add_frame_buffers(range),
                Notice::Event(event) => self.listener.dispatch_event(event),
                Notice::ClearBuffering => {
                    if self.listener.is_buffering() {
                        self.listener.dispatch_event(StreamEvent::Buffering(false));
                    }
                }
            }
        }
    }
}
