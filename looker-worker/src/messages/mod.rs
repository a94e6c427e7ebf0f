//! Tagged message protocols spoken between the orchestrator and workers.
//!
//! - **Stream messages** ([`stream`]) - chunked frame fetching for one video
//! - **Label messages** ([`labels`]) - per-sample label decoding and painting
//!
//! Each protocol is a pair of enums matched exhaustively on both sides.
//! Payloads are moved into a request and out of a response; the sender
//! keeps no access to a buffer it has posted.

pub mod labels;
pub mod stream;

pub use labels::{
    merge_fields, strip_to_labels, LabelPaintWorker, LabelPainter, LabelWorkerRequest,
    LabelWorkerResponse, SampleFields,
};
pub use stream::{
    ChunkRequest, ChunkResponse, ChunkStreamWorker, FrameChunkSource, FramePayload, StreamRequest,
    StreamResponse,
};
