//! Isolated execution contexts for the Looker engine.
//!
//! Expensive work (chunked frame fetching, label decoding) runs outside the
//! orchestrator in execution contexts that are reachable only through
//! messages. This crate provides:
//!
//! - [`ExecutionContext`] / [`WorkerFactory`] - the seam the orchestrator
//!   components are written against; tests substitute their own factory
//! - [`ThreadWorkerFactory`] - one OS thread per context, fed by a flume
//!   channel and running a [`WorkerHandler`]
//! - [`messages`] - the stream and label protocols with their handlers
//!
//! # Example
//!
//! ```no_run
//! use looker_worker::messages::{ChunkStreamWorker, FrameChunkSource, StreamResponse};
//! use looker_worker::{ThreadWorkerFactory, WorkerEvent, WorkerFactory, WorkerListener};
//! use std::sync::Arc;
//! # use looker_worker::messages::{ChunkRequest, ChunkResponse};
//! # use looker_worker::WorkerError;
//! # struct Backend;
//! # impl FrameChunkSource for Backend {
//! #     fn fetch(&mut self, _: &ChunkRequest) -> Result<ChunkResponse, WorkerError> { unimplemented!() }
//! # }
//!
//! let factory = ThreadWorkerFactory::new("stream", || ChunkStreamWorker::new(Backend));
//! let listener: WorkerListener<StreamResponse> = Arc::new(|event| match event {
//!     WorkerEvent::Message(StreamResponse::FrameChunk { range, .. }) => println!("got {range}"),
//!     WorkerEvent::Error(e) => eprintln!("stream failed: {e}"),
//! });
//! let _context = factory.create(listener);
//! ```

pub mod context;
pub mod errors;
pub mod messages;

pub use context::{
    ExecutionContext, ThreadContext, ThreadWorkerFactory, WorkerEvent, WorkerFactory,
    WorkerHandler, WorkerListener,
};
pub use errors::WorkerError;
