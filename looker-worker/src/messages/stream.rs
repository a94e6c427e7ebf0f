//! Frame streaming protocol.
//!
//! A stream worker holds at most one session. [`StreamRequest::SetStream`]
//! starts it and answers with the first chunk; every
//! [`StreamRequest::RequestFrameChunk`] answers with the chunk after the
//! last one delivered. Responses carry the session's subscription token so
//! the coordinator can drop answers from a superseded session.

use crate::context::WorkerHandler;
use crate::errors::WorkerError;
use looker_common::{FrameNumber, FrameRange, SampleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

/// Orchestrator-to-worker messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum StreamRequest {
    SetStream {
        subscription: Uuid,
        sample_id: SampleId,
        dataset: String,
        view: serde_json::Value,
        group: Option<String>,
        frame_number: FrameNumber,
        frame_count: FrameNumber,
        num_frames: u32,
    },
    RequestFrameChunk {
        subscription: Uuid,
    },
}

/// Worker-to-orchestrator messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum StreamResponse {
    FrameChunk {
        subscription: Uuid,
        frames: Vec<FramePayload>,
        range: FrameRange,
    },
}

/// Raw data of one frame as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame_number: FrameNumber,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Query sent to the chunk fetch backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub frame_number: FrameNumber,
    pub num_frames: u32,
    pub frame_count: FrameNumber,
    pub sample_id: SampleId,
    pub dataset: String,
    pub view: serde_json::Value,
}

/// Backend answer to a [`ChunkRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub frames: Vec<FramePayload>,
    pub range: FrameRange,
}

/// The network fetch performed inside a stream worker.
pub trait FrameChunkSource: Send {
    fn fetch(&mut self, request: &ChunkRequest) -> Result<ChunkResponse, WorkerError>;
}

#[derive(Debug)]
struct Session {
    subscription: Uuid,
    sample_id: SampleId,
    dataset: String,
    view: serde_json::Value,
    frame_count: FrameNumber,
    num_frames: u32,
    /// First frame of the next chunk; `None` once the video is covered.
    cursor: Option<FrameNumber>,
}

/// [`WorkerHandler`] driving a [`FrameChunkSource`] one chunk at a time.
pub struct ChunkStreamWorker<S> {
    source: S,
    session: Option<Session>,
}

impl<S: FrameChunkSource> ChunkStreamWorker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            session: None,
        }
    }

    fn fetch_next(&mut self) -> Result<Option<StreamResponse>, WorkerError> {
        let Some(session) = self.session.as_mut() else {
            return Err(WorkerError::Protocol("no active stream".to_string()));
        };
        let Some(frame_number) = session.cursor else {
            trace!(subscription = %session.subscription, "Stream already complete");
            return Ok(None);
        };

        let request = ChunkRequest {
            frame_number,
            num_frames: session.num_frames,
            frame_count: session.frame_count,
            sample_id: session.sample_id.clone(),
            dataset: session.dataset.clone(),
            view: session.view.clone(),
        };
        let ChunkResponse { frames, range } = self.source.fetch(&request)?;
        session.cursor = (range.end < session.frame_count).then_some(range.end + 1);
        trace!(subscription = %session.subscription, %range, frames = frames.len(), "Fetched chunk");

        Ok(Some(StreamResponse::FrameChunk {
            subscription: session.subscription,
            frames,
            range,
        }))
    }
}

impl<S: FrameChunkSource> WorkerHandler<StreamRequest, StreamResponse> for ChunkStreamWorker<S> {
    fn handle(&mut self, request: StreamRequest) -> Result<Option<StreamResponse>, WorkerError> {
        match request {
            StreamRequest::SetStream {
                subscription,
                sample_id,
                dataset,
                view,
                group,
                frame_number,
                frame_count,
                num_frames,
            } => {
                debug!(%subscription, sample = %sample_id, ?group, frame_number, frame_count, "Starting stream");
                self.session = Some(Session {
                    subscription,
                    sample_id,
                    dataset,
                    view,
                    frame_count,
                    num_frames,
                    cursor: Some(frame_number),
                });
                self.fetch_next()
            }
            StreamRequest::RequestFrameChunk { subscription } => {
                match &self.session {
                    Some(session) if session.subscription == subscription => self.fetch_next(),
                    _ => {
                        trace!(%subscription, "Ignoring chunk request for another stream");
                        Ok(None)
                    }
                }
            }
        }
    }
}
