//! Label painting protocol.
//!
//! The orchestrator posts a sample stripped down to its label fields; the
//! worker decodes and paints those labels in place and sends the fields
//! back. `dispatch_id` correlates a response with the dispatch that
//! produced it.

use crate::context::WorkerHandler;
use crate::errors::WorkerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

/// Sample fields keyed by field name.
pub type SampleFields = Map<String, Value>;

/// Orchestrator-to-worker messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum LabelWorkerRequest {
    ProcessSample {
        dispatch_id: u64,
        sample: SampleFields,
        labels: Vec<String>,
        coloring: Value,
        #[serde(default)]
        customize_color_setting: Value,
    },
}

/// Worker-to-orchestrator messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum LabelWorkerResponse {
    ProcessedSample {
        dispatch_id: u64,
        sample: SampleFields,
        coloring: Value,
    },
}

/// The CPU-bound decode and paint step run inside a label worker.
pub trait LabelPainter: Send {
    /// Paint the named label fields of `sample` in place.
    fn paint(
        &mut self,
        sample: &mut SampleFields,
        labels: &[String],
        coloring: &Value,
        customize_color_setting: &Value,
    ) -> Result<(), WorkerError>;
}

/// [`WorkerHandler`] wrapping a [`LabelPainter`].
pub struct LabelPaintWorker<P> {
    painter: P,
}

impl<P: LabelPainter> LabelPaintWorker<P> {
    pub fn new(painter: P) -> Self {
        Self { painter }
    }
}

impl<P: LabelPainter> WorkerHandler<LabelWorkerRequest, LabelWorkerResponse> for LabelPaintWorker<P> {
    fn handle(
        &mut self,
        request: LabelWorkerRequest,
    ) -> Result<Option<LabelWorkerResponse>, WorkerError> {
        match request {
            LabelWorkerRequest::ProcessSample {
                dispatch_id,
                mut sample,
                labels,
                coloring,
                customize_color_setting,
            } => {
                trace!(dispatch_id, labels = labels.len(), "Painting sample");
                self.painter
                    .paint(&mut sample, &labels, &coloring, &customize_color_setting)?;
                Ok(Some(LabelWorkerResponse::ProcessedSample {
                    dispatch_id,
                    sample,
                    coloring,
                }))
            }
        }
    }
}

/// Keep only the top-level fields named by `labels`.
///
/// Label paths may be nested (`"frames.detections"`); only the first path
/// segment selects a top-level field.
pub fn strip_to_labels(sample: &SampleFields, labels: &[String]) -> SampleFields {
    let mut stripped = Map::new();
    for label in labels {
        let field = label.split('.').next().unwrap_or(label.as_str());
        if stripped.contains_key(field) {
            continue;
        }
        if let Some(value) = sample.get(field) {
            stripped.insert(field.to_string(), value.clone());
        }
    }
    stripped
}

/// Shallow-merge `painted` fields over `sample`.
pub fn merge_fields(sample: &mut SampleFields, painted: SampleFields) {
    for (field, value) in painted {
        sample.insert(field, value);
    }
}
