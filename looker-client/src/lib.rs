//! Orchestration layer of the Looker media engine.
//!
//! This crate drives the isolated workers of `looker-worker` on behalf of
//! the viewing surface:
//!
//! - [`FrameStreamCoordinator`] keeps one chunked frame stream per video
//!   player alive, restarting it on backward seeks and evicting frames
//!   under a count and byte budget
//! - [`AsyncLabelRenderingManager`] schedules per-sample label painting
//!   over a fixed worker pool, coalescing repeated requests for a sample
//! - [`EngineConfig`] holds the budgets of both, plus those of the
//!   instance cache from `looker-cache`
//!
//! # Quick Start
//!
//! ```no_run
//! use looker_client::{AsyncLabelRenderingManager, EngineConfig, LabelPaintingRequest, PaintContext};
//! use looker_worker::messages::{LabelPaintWorker, LabelPainter, SampleFields};
//! use looker_worker::ThreadWorkerFactory;
//! # use looker_worker::WorkerError;
//! # struct Painter;
//! # impl LabelPainter for Painter {
//! #     fn paint(&mut self, _: &mut SampleFields, _: &[String], _: &serde_json::Value, _: &serde_json::Value) -> Result<(), WorkerError> { Ok(()) }
//! # }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::builder().num_workers(4).build()?;
//! let factory = ThreadWorkerFactory::new("labels", || LabelPaintWorker::new(Painter));
//! let manager = AsyncLabelRenderingManager::new(&config.label_rendering, &factory);
//!
//! let ticket = manager.enqueue_label_painting_job(LabelPaintingRequest {
//!     sample_id: "sample-1".into(),
//!     sample: SampleFields::new(),
//!     labels: vec!["ground_truth".to_string()],
//!     context: PaintContext::default(),
//! });
//! let painted = ticket.result().await?;
//! # let _ = painted;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Each component keeps its orchestration state behind one mutex. Worker
//! callbacks arrive on worker threads and take the same lock; listener
//! callbacks into the surface always run after it is released.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod frame_stream;
pub mod labels;
pub mod messages;

pub use config::{
    EngineConfig, EngineConfigBuilder, FrameStreamConfig, InstanceCacheConfig,
    LabelRenderingConfig,
};
pub use errors::{EngineError, LabelRenderError};
pub use frame_stream::{
    Frame, FrameReader, FrameStreamCoordinator, FrameStreamListener, FrameStreamStats, Overlay,
    StreamOptions,
};
pub use labels::{
    AsyncLabelRenderingManager, LabelPaintingRequest, LabelPaintingTicket, LabelSchedulerStats,
    PaintContext, PaintedSample,
};
pub use messages::StreamEvent;
