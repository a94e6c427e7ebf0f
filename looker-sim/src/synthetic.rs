//! Synthetic stand-ins for the viewing surface and the backends.

use looker_cache::RenderInstance;
use looker_client::{Frame, FrameStreamListener, Overlay, StreamEvent};
use looker_common::{FrameNumber, FrameRange, LoadCallback, LoadSignal, SubscriptionId};
use looker_worker::messages::{
    ChunkRequest, ChunkResponse, FrameChunkSource, FramePayload, LabelPainter, SampleFields,
};
use looker_worker::WorkerError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// A grid tile whose size is known once its media "decodes".
pub struct SyntheticViewer {
    key: String,
    size_bytes: usize,
    signal: LoadSignal,
    destroyed: AtomicBool,
}

impl SyntheticViewer {
    pub fn new(key: impl Into<String>, size_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            size_bytes,
            signal: LoadSignal::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Finish decoding and notify load subscribers.
    pub fn finish_loading(&self) {
        if !self.signal.is_loaded() {
            trace!(key = %self.key, "Viewer loaded");
            self.signal.fire();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl RenderInstance for SyntheticViewer {
    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn size_bytes_estimate(&self) -> usize {
        self.size_bytes
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

/// Chunk backend generating frames with a few detections each.
pub struct SyntheticChunkSource {
    pub detections_per_frame: usize,
}

impl FrameChunkSource for SyntheticChunkSource {
    fn fetch(&mut self, request: &ChunkRequest) -> Result<ChunkResponse, WorkerError> {
        if request.frame_number == 0 || request.frame_number > request.frame_count {
            return Err(WorkerError::Fetch(format!(
                "frame {} outside 1..={}",
                request.frame_number, request.frame_count
            )));
        }
        let range = FrameRange::chunk_at(request.frame_number, request.num_frames, request.frame_count);
        let frames = (range.start..=range.end)
            .map(|frame_number| FramePayload {
                frame_number,
                data: json!({
                    "frame_number": frame_number,
                    "detections": (0..self.detections_per_frame)
                        .map(|i| json!({ "label": format!("object-{i}"), "index": i }))
                        .collect::<Vec<_>>(),
                }),
            })
            .collect();
        Ok(ChunkResponse { frames, range })
    }
}

/// Painter marking every requested label as painted.
pub struct SyntheticPainter;

impl LabelPainter for SyntheticPainter {
    fn paint(
        &mut self,
        sample: &mut SampleFields,
        labels: &[String],
        coloring: &Value,
        _customize_color_setting: &Value,
    ) -> Result<(), WorkerError> {
        for label in labels {
            let field = label.split('.').next().unwrap_or(label.as_str());
            match sample.get_mut(field) {
                Some(Value::Object(fields)) => {
                    fields.insert("painted".to_string(), Value::Bool(true));
                    fields.insert("color".to_string(), coloring.get("by").cloned().unwrap_or(Value::Null));
                }
                Some(_) => return Err(WorkerError::Paint(format!("{field} is not a label"))),
                None => {}
            }
        }
        Ok(())
    }
}

/// Decoded detection mask of one frame.
struct DetectionMask {
    bytes: usize,
    cleaned: Arc<AtomicUsize>,
}

impl Overlay for DetectionMask {
    fn size_bytes(&self) -> usize {
        self.bytes
    }

    fn cleanup(&self) {
        self.cleaned.fetch_add(1, Ordering::Relaxed);
    }
}

/// Video player recording what the coordinator tells it.
#[derive(Default)]
pub struct SyntheticPlayer {
    buffered: Mutex<Vec<FrameRange>>,
    frames_added: AtomicUsize,
    frames_removed: AtomicUsize,
    overlays_cleaned: Arc<AtomicUsize>,
    errors: Mutex<Vec<String>>,
    buffering: AtomicBool,
}

impl SyntheticPlayer {
    pub fn set_buffering(&self, buffering: bool) {
        self.buffering.store(buffering, Ordering::Release);
    }

    pub fn buffered_ranges(&self) -> Vec<FrameRange> {
        self.buffered.lock().clone()
    }

    pub fn frames_added(&self) -> usize {
        self.frames_added.load(Ordering::Relaxed)
    }

    pub fn frames_removed(&self) -> usize {
        self.frames_removed.load(Ordering::Relaxed)
    }

    pub fn overlays_cleaned(&self) -> usize {
        self.overlays_cleaned.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl FrameStreamListener for SyntheticPlayer {
    fn load_overlays(&self, frame: &FramePayload) -> Vec<Box<dyn Overlay>> {
        let detections = frame
            .data
            .get("detections")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        (0..detections)
            .map(|_| {
                Box::new(DetectionMask {
                    bytes: 4096,
                    cleaned: self.overlays_cleaned.clone(),
                }) as Box<dyn Overlay>
            })
            .collect()
    }

    fn add_frame(&self, _frame_number: FrameNumber, _frame: Arc<Frame>) {
        self.frames_added.fetch_add(1, Ordering::Relaxed);
    }

    fn remove_frame(&self, _frame_number: FrameNumber) {
        self.frames_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_frame_buffers(&self, range: FrameRange) {
        self.buffered.lock().push(range);
    }

    fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    fn dispatch_event(&self, event: StreamEvent) {
        debug!(?event, "Player event");
        match event {
            StreamEvent::Buffering(buffering) => self.set_buffering(buffering),
            StreamEvent::Error { message } => self.errors.lock().push(message),
        }
    }
}

/// A sample with two label fields and some metadata.
pub fn synthetic_sample(index: usize) -> SampleFields {
    let sample = json!({
        "id": format!("sample-{index:05}"),
        "filepath": format!("/media/sample-{index:05}.jpg"),
        "tags": ["synthetic"],
        "ground_truth": { "_cls": "Detections", "detections": [{ "label": "cat" }] },
        "predictions": { "_cls": "Detections", "detections": [{ "label": "dog", "confidence": 0.9 }] },
    });
    match sample {
        Value::Object(fields) => fields,
        _ => SampleFields::new(),
    }
}
