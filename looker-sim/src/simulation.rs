//! The three simulated workloads: grid scrolling, video playback and label
//! painting.

use crate::synthetic::{
    synthetic_sample, SyntheticChunkSource, SyntheticPainter, SyntheticPlayer, SyntheticViewer,
};
use anyhow::{bail, Result};
use looker_cache::{CacheHooks, InstanceCache};
use looker_client::{
    AsyncLabelRenderingManager, EngineConfig, EngineError, FrameReader, FrameStreamCoordinator,
    LabelPaintingRequest, LabelRenderError, PaintContext, StreamOptions,
};
use looker_common::{FrameNumber, SampleId};
use looker_worker::messages::{
    ChunkStreamWorker, LabelPaintWorker, LabelWorkerRequest, LabelWorkerResponse, StreamRequest,
    StreamResponse,
};
use looker_worker::{ThreadWorkerFactory, WorkerFactory};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tiles visible at once in the grid.
const GRID_WINDOW: usize = 24;
/// Tiles scrolled per step.
const GRID_STEP: usize = 8;
/// Longest wait for a single frame before the playback is declared stuck.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Workload sizes.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub samples: usize,
    pub frames: u32,
    pub jobs: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GridReport {
    pub scroll_steps: usize,
    pub viewers_created: usize,
    pub viewers_disposed: usize,
    pub shown: usize,
    pub hidden: usize,
    pub pending: usize,
    pub hidden_size_bytes: usize,
    /// Summed size of the tiles visible when scrolling stopped.
    pub visible_size_bytes: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoReport {
    pub frames_played: u32,
    pub sessions_started: u64,
    pub chunks_received: u64,
    pub stale_messages: u64,
    pub frames_cached: usize,
    pub frames_evicted: u64,
    pub overlays_cleaned: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LabelReport {
    pub requests: usize,
    pub painted: usize,
    pub failed: usize,
    /// Failed requests enqueued a second time.
    pub retried: usize,
    pub dispatched: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub grid: GridReport,
    pub video: VideoReport,
    pub labels: LabelReport,
}

/// Run all three workloads in sequence.
pub async fn run(config: &EngineConfig, options: SimulationOptions) -> Result<SimulationReport> {
    let started = Instant::now();
    let grid = simulate_grid(config, options.samples).await?;
    info!(
        steps = grid.scroll_steps,
        created = grid.viewers_created,
        disposed = grid.viewers_disposed,
        "Grid scroll finished"
    );

    let video = simulate_playback(config, options.frames).await?;
    info!(
        frames = video.frames_played,
        sessions = video.sessions_started,
        chunks = video.chunks_received,
        "Playback finished"
    );

    let labels = simulate_labels(config, options.jobs).await;
    info!(
        requests = labels.requests,
        painted = labels.painted,
        dispatched = labels.dispatched,
        "Label painting finished"
    );

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Simulation complete");
    Ok(SimulationReport {
        grid,
        video,
        labels,
    })
}

/// Scroll a grid window over `samples` tiles.
///
/// Even tiles decode right away; odd tiles finish decoding one step later,
/// so some hidden tiles pass through the pending partition.
pub async fn simulate_grid(config: &EngineConfig, samples: usize) -> Result<GridReport> {
    let disposed = Arc::new(AtomicUsize::new(0));
    let counter = disposed.clone();
    let cache = InstanceCache::new(
        config.instance_cache.limits(),
        CacheHooks::new().on_dispose(move |key| {
            debug!(key, "Viewer disposed");
            counter.fetch_add(1, Ordering::Relaxed);
        }),
    );

    let mut viewers: HashMap<String, Arc<SyntheticViewer>> = HashMap::new();
    let mut visible: Vec<String> = Vec::new();
    let mut decoding: Vec<Arc<SyntheticViewer>> = Vec::new();
    let mut report = GridReport::default();

    let mut start = 0;
    while start < samples {
        for viewer in decoding.drain(..) {
            viewer.finish_loading();
        }

        let window: Vec<String> = (start..samples.min(start + GRID_WINDOW))
            .map(|index| format!("sample-{index:05}"))
            .collect();

        for key in visible.iter().filter(|key| !window.contains(key)) {
            cache.hide(Some(key.as_str()));
        }

        for (offset, key) in window.iter().enumerate() {
            let index = start + offset;
            match cache.get(key) {
                Some(_) if !cache.is_shown(key) => cache.show(key),
                Some(_) => {}
                None => {
                    let viewer = SyntheticViewer::new(key.clone(), tile_size(index));
                    cache.set(key.clone(), viewer.clone());
                    viewers.insert(key.clone(), viewer.clone());
                    report.viewers_created += 1;
                    if index % 2 == 0 {
                        viewer.finish_loading();
                    } else {
                        decoding.push(viewer);
                    }
                }
            }
        }

        visible = window;
        report.scroll_steps += 1;
        start += GRID_STEP;
    }

    for viewer in decoding.drain(..) {
        viewer.finish_loading();
    }
    for key in &visible {
        report.visible_size_bytes += cache.size_of(key).await.map_err(EngineError::from)?;
    }

    // Opening and closing the modal parks the grid and sends it back through hide.
    cache.freeze();
    cache.unfreeze();

    let stats = cache.stats();
    report.viewers_disposed = disposed.load(Ordering::Relaxed);
    report.shown = stats.shown;
    report.hidden = stats.hidden;
    report.pending = stats.pending;
    report.hidden_size_bytes = stats.hidden_size_bytes;
    report.evictions = stats.evictions;

    cache.delete();
    let leaked = viewers.values().filter(|viewer| !viewer.is_destroyed()).count();
    if leaked > 0 {
        warn!(leaked, "Viewers survived cache teardown");
    }
    Ok(report)
}

fn tile_size(index: usize) -> usize {
    (2 << 20) + (index % 7) * (256 << 10)
}

/// Play a video front to back, then scrub back to its first quarter.
pub async fn simulate_playback(config: &EngineConfig, frames: u32) -> Result<VideoReport> {
    let frame_count = frames.max(1);
    let player = Arc::new(SyntheticPlayer::default());
    player.set_buffering(true);

    let factory: Arc<dyn WorkerFactory<StreamRequest, StreamResponse>> =
        Arc::new(ThreadWorkerFactory::new("frame-stream", || {
            ChunkStreamWorker::new(SyntheticChunkSource {
                detections_per_frame: 3,
            })
        }));
    let coordinator =
        FrameStreamCoordinator::new(config.frame_stream.clone(), factory, player.clone());

    let reader = coordinator.acquire_reader(StreamOptions {
        active_paths: vec!["frames.detections".to_string()],
        coloring: json!({ "by": "field" }),
        customize_color_setting: serde_json::Value::Null,
        dataset: "synthetic-video".to_string(),
        frame_number: 1,
        frame_count,
        sample_id: SampleId::from("video-00001"),
        schema: serde_json::Value::Null,
        view: json!([]),
        group: None,
    });

    let mut played = 0;
    for frame_number in 1..=frame_count {
        play_frame(&coordinator, &reader, &player, frame_number).await?;
        played += 1;
    }

    let scrub_target = (frame_count / 4).max(1);
    debug!(scrub_target, "Scrubbing back");
    play_frame(&coordinator, &reader, &player, scrub_target).await?;

    let stats = coordinator.stats();
    coordinator.clear_reader();

    Ok(VideoReport {
        frames_played: played,
        sessions_started: stats.sessions_started,
        chunks_received: stats.chunks_received,
        stale_messages: stats.stale_messages,
        frames_cached: stats.frames_cached,
        frames_evicted: stats.frames_evicted,
        overlays_cleaned: player.overlays_cleaned(),
        errors: player.errors(),
    })
}

/// Request a missing frame on every tick until it is cached.
async fn play_frame(
    coordinator: &FrameStreamCoordinator,
    reader: &FrameReader,
    player: &SyntheticPlayer,
    frame_number: FrameNumber,
) -> Result<()> {
    let deadline = Instant::now() + FRAME_TIMEOUT;
    loop {
        if coordinator.frame(frame_number).is_some() {
            return Ok(());
        }
        reader.request_frames(frame_number);
        if let Some(error) = player.errors().last() {
            bail!("Stream failed at frame {frame_number}: {error}");
        }
        if Instant::now() >= deadline {
            bail!(
                "Frame {frame_number} not buffered within {FRAME_TIMEOUT:?} (buffered: {})",
                player.buffered_ranges().len()
            );
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Issue `requests` paint requests over half as many samples so that some
/// of them coalesce.
pub async fn simulate_labels(config: &EngineConfig, requests: usize) -> LabelReport {
    let factory = ThreadWorkerFactory::new("label-painter", || {
        LabelPaintWorker::new(SyntheticPainter)
    });
    let pool: &dyn WorkerFactory<LabelWorkerRequest, LabelWorkerResponse> = &factory;
    let manager = AsyncLabelRenderingManager::new(&config.label_rendering, pool);

    let distinct = (requests / 2).max(1);
    let jobs: Vec<LabelPaintingRequest> = (0..requests)
        .map(|request| {
            let index = request % distinct;
            let labels = if request % 3 == 0 {
                vec!["ground_truth".to_string(), "predictions".to_string()]
            } else {
                vec!["ground_truth".to_string()]
            };
            LabelPaintingRequest {
                sample_id: SampleId::new(format!("sample-{index:05}")),
                sample: synthetic_sample(index),
                labels,
                context: PaintContext {
                    coloring: json!({ "by": "field" }),
                    customize_color_setting: serde_json::Value::Null,
                },
            }
        })
        .collect();
    let tickets: Vec<_> = jobs
        .iter()
        .map(|job| manager.enqueue_label_painting_job(job.clone()))
        .collect();

    let mut report = LabelReport {
        requests,
        ..LabelReport::default()
    };
    for (job, ticket) in jobs.into_iter().zip(tickets) {
        let mut result = ticket.result().await;
        if matches!(&result, Err(e) if is_retryable(e)) {
            debug!(sample = %job.sample_id, "Retrying label painting");
            report.retried += 1;
            result = manager.enqueue_label_painting_job(job).result().await;
        }
        match result {
            Ok(_) => report.painted += 1,
            Err(e) => {
                warn!(error = %e, "Label painting failed");
                report.failed += 1;
            }
        }
    }
    report.dispatched = manager.stats().dispatched;
    report
}

/// Backend failures are worth one more attempt; dead workers are not.
fn is_retryable(error: &LabelRenderError) -> bool {
    match error {
        LabelRenderError::Worker(e) => EngineError::from(e.clone()).is_retryable(),
        LabelRenderError::Abandoned => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looker_worker::WorkerError;

    #[test]
    fn test_only_backend_failures_are_retried() {
        assert!(is_retryable(&LabelRenderError::Worker(WorkerError::Paint(
            "bad mask".to_string()
        ))));
        assert!(!is_retryable(&LabelRenderError::Worker(WorkerError::Terminated)));
        assert!(!is_retryable(&LabelRenderError::Worker(WorkerError::Panicked(
            "decoder".to_string()
        ))));
        assert!(!is_retryable(&LabelRenderError::Abandoned));
    }
}
