//! Label painting jobs scheduled over a fixed pool of workers.
//!
//! Jobs are keyed by sample. At most one undispatched job exists per
//! sample: a new request for a sample that is still queued overwrites the
//! queued job's payload and joins its waiters. A sample whose job is on a
//! worker is *processing*; requests for it queue behind and are never
//! dispatched concurrently.
//!
//! Every claim of a worker or processing flag is paired with a release on
//! both the success and the failure path.

use crate::config::LabelRenderingConfig;
use crate::errors::LabelRenderError;
use looker_common::SampleId;
use looker_worker::messages::{
    merge_fields, strip_to_labels, LabelWorkerRequest, LabelWorkerResponse, SampleFields,
};
use looker_worker::{ExecutionContext, WorkerError, WorkerEvent, WorkerFactory, WorkerListener};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Colour settings forwarded to the painter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaintContext {
    #[serde(default)]
    pub coloring: Value,
    #[serde(default)]
    pub customize_color_setting: Value,
}

/// One request to paint the labels of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPaintingRequest {
    pub sample_id: SampleId,
    /// The full sample. Only the fields named by `labels` reach the worker.
    pub sample: SampleFields,
    /// Label field paths to paint.
    pub labels: Vec<String>,
    pub context: PaintContext,
}

/// Result of a painting job: the full sample with painted label fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintedSample {
    pub sample: SampleFields,
    pub coloring: Value,
}

type JobResult = Result<PaintedSample, LabelRenderError>;

/// Resolves once the job carrying this request completes.
#[derive(Debug)]
pub struct LabelPaintingTicket {
    receiver: flume::Receiver<JobResult>,
}

impl LabelPaintingTicket {
    /// Wait for the result asynchronously.
    pub async fn result(self) -> JobResult {
        self.receiver
            .recv_async()
            .await
            .unwrap_or(Err(LabelRenderError::Abandoned))
    }

    /// Block the current thread until the result is available.
    pub fn wait(self) -> JobResult {
        self.receiver.recv().unwrap_or(Err(LabelRenderError::Abandoned))
    }

    /// The result, if the job has already completed.
    pub fn try_result(&self) -> Option<JobResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(LabelRenderError::Abandoned)),
        }
    }
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelSchedulerStats {
    pub workers: usize,
    pub free_workers: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Samples whose job is on a worker.
    pub processing: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

struct Job {
    sample: SampleFields,
    labels: Vec<String>,
    context: PaintContext,
    waiters: Vec<flume::Sender<JobResult>>,
}

struct InFlight {
    dispatch_id: u64,
    sample_id: SampleId,
    sample: SampleFields,
    waiters: Vec<flume::Sender<JobResult>>,
}

type LabelContext = Box<dyn ExecutionContext<LabelWorkerRequest>>;

#[derive(Default)]
struct SchedulerState {
    workers: Vec<LabelContext>,
    free: VecDeque<usize>,
    /// Queue order of pending jobs.
    queue: VecDeque<SampleId>,
    /// Pending job per sample.
    pending: HashMap<SampleId, Job>,
    processing: HashSet<SampleId>,
    /// In-flight job per worker index.
    in_flight: HashMap<usize, InFlight>,
    next_dispatch_id: u64,
    dispatched: u64,
    completed: u64,
    failed: u64,
}

impl SchedulerState {
    /// Dispatch queued jobs while a worker is free and a job is eligible.
    fn process_queue(&mut self) {
        while !self.free.is_empty() {
            let Some(position) = self
                .queue
                .iter()
                .position(|sample_id| !self.processing.contains(sample_id))
            else {
                break;
            };
            let Some(sample_id) = self.queue.remove(position) else {
                break;
            };
            let Some(job) = self.pending.remove(&sample_id) else {
                continue;
            };
            let Some(worker) = self.free.pop_front() else {
                break;
            };
            self.dispatch(worker, sample_id, job);
        }
    }

    fn dispatch(&mut self, worker: usize, sample_id: SampleId, job: Job) {
        self.next_dispatch_id += 1;
        let dispatch_id = self.next_dispatch_id;
        let request = LabelWorkerRequest::ProcessSample {
            dispatch_id,
            sample: strip_to_labels(&job.sample, &job.labels),
            labels: job.labels,
            coloring: job.context.coloring,
            customize_color_setting: job.context.customize_color_setting,
        };
        trace!(worker, dispatch_id, sample = %sample_id, "Dispatching label job");

        self.processing.insert(sample_id.clone());
        self.dispatched += 1;
        let posted = match self.workers.get(worker) {
            Some(context) => context.post_message(request),
            None => Err(WorkerError::Terminated),
        };
        let flight = InFlight {
            dispatch_id,
            sample_id,
            sample: job.sample,
            waiters: job.waiters,
        };
        match posted {
            Ok(()) => {
                self.in_flight.insert(worker, flight);
            }
            Err(e) => {
                warn!(worker, error = %e, "Failed to post label job");
                self.finish(worker, flight, Err(LabelRenderError::Worker(e)));
            }
        }
    }

    /// Resolve a job's waiters and release its worker and processing flag.
    fn finish(&mut self, worker: usize, flight: InFlight, result: JobResult) {
        match &result {
            Ok(_) => self.completed += 1,
            Err(_) => self.failed += 1,
        }
        for waiter in flight.waiters {
            let _ = waiter.send(result.clone());
        }
        self.processing.remove(&flight.sample_id);
        self.free.push_back(worker);
    }

    fn is_processing(&self) -> bool {
        !self.queue.is_empty() || !self.processing.is_empty()
    }
}

struct ManagerInner {
    state: Mutex<SchedulerState>,
}

impl ManagerInner {
    fn on_worker_event(&self, worker: usize, event: WorkerEvent<LabelWorkerResponse>) {
        let mut state = self.state.lock();
        match event {
            WorkerEvent::Message(LabelWorkerResponse::ProcessedSample {
                dispatch_id,
                sample: painted,
                coloring,
            }) => {
                match state.in_flight.get(&worker) {
                    Some(flight) if flight.dispatch_id == dispatch_id => {}
                    _ => {
                        trace!(worker, dispatch_id, "Ignoring stale label response");
                        return;
                    }
                }
                let Some(mut flight) = state.in_flight.remove(&worker) else {
                    return;
                };
                let mut sample = std::mem::take(&mut flight.sample);
                merge_fields(&mut sample, painted);
                trace!(worker, dispatch_id, sample = %flight.sample_id, "Label job complete");
                state.finish(worker, flight, Ok(PaintedSample { sample, coloring }));
            }
            WorkerEvent::Error(e) => {
                let Some(flight) = state.in_flight.remove(&worker) else {
                    trace!(worker, error = %e, "Ignoring error from idle worker");
                    return;
                };
                warn!(worker, sample = %flight.sample_id, error = %e, "Label job failed");
                state.finish(worker, flight, Err(LabelRenderError::Worker(e)));
            }
        }
        state.process_queue();
    }
}

/// Schedules label painting over a fixed pool of execution contexts.
pub struct AsyncLabelRenderingManager {
    inner: Arc<ManagerInner>,
}

impl AsyncLabelRenderingManager {
    /// Create `config.num_workers` workers up front; all start free.
    pub fn new(
        config: &LabelRenderingConfig,
        factory: &dyn WorkerFactory<LabelWorkerRequest, LabelWorkerResponse>,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            state: Mutex::new(SchedulerState::default()),
        });

        let num_workers = config.num_workers.max(1);
        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
            let listener: WorkerListener<LabelWorkerResponse> = Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_worker_event(index, event);
                }
            });
            workers.push(factory.create(listener));
        }

        {
            let mut state = inner.state.lock();
            state.workers = workers;
            state.free = (0..num_workers).collect();
        }
        debug!(num_workers, "Label rendering pool ready");

        Self { inner }
    }

    /// Queue a painting job, coalescing with a queued job for the same sample.
    pub fn enqueue_label_painting_job(&self, request: LabelPaintingRequest) -> LabelPaintingTicket {
        let (sender, receiver) = flume::bounded(1);
        let LabelPaintingRequest {
            sample_id,
            sample,
            labels,
            context,
        } = request;

        let mut state = self.inner.state.lock();
        if let Some(job) = state.pending.get_mut(&sample_id) {
            trace!(sample = %sample_id, "Coalescing label job");
            job.sample = sample;
            job.labels = labels;
            job.context = context;
            job.waiters.push(sender);
        } else {
            state.pending.insert(
                sample_id.clone(),
                Job {
                    sample,
                    labels,
                    context,
                    waiters: vec![sender],
                },
            );
            state.queue.push_back(sample_id);
            state.process_queue();
        }

        LabelPaintingTicket { receiver }
    }

    /// True while any job is queued or on a worker.
    ///
    /// Unlike a queue-only check, this stays true until the last in-flight
    /// job has resolved its waiters.
    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().is_processing()
    }

    pub fn stats(&self) -> LabelSchedulerStats {
        let state = self.inner.state.lock();
        LabelSchedulerStats {
            workers: state.workers.len(),
            free_workers: state.free.len(),
            queued: state.queue.len(),
            processing: state.processing.len(),
            dispatched: state.dispatched,
            completed: state.completed,
            failed: state.failed,
        }
    }
}

impl Drop for AsyncLabelRenderingManager {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        for context in state.workers.iter_mut() {
            context.terminate();
        }
    }
}
