//! Execution contexts: isolated workers reached only through messages.
//!
//! The orchestrator owns a `Box<dyn ExecutionContext<Req>>` per worker and
//! receives results through the [`WorkerListener`] it handed to the
//! factory. Requests are moved into the context and responses are moved
//! out; nothing is shared between the two sides.

use crate::errors::WorkerError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// Event delivered from an execution context to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent<R> {
    /// A response produced by the worker.
    Message(R),
    /// The worker failed while handling a request.
    Error(WorkerError),
}

/// Callback receiving every event of one execution context.
///
/// Invoked on the worker's own thread.
pub type WorkerListener<R> = Arc<dyn Fn(WorkerEvent<R>) + Send + Sync>;

/// Handle to one isolated execution context.
pub trait ExecutionContext<Req>: Send {
    /// Hand a request over to the worker.
    fn post_message(&self, request: Req) -> Result<(), WorkerError>;

    /// Stop the worker. No events are delivered afterwards and further
    /// posts fail with [`WorkerError::Terminated`]. Idempotent.
    fn terminate(&mut self);
}

/// Creates execution contexts wired to a listener.
pub trait WorkerFactory<Req, Resp>: Send + Sync {
    fn create(&self, listener: WorkerListener<Resp>) -> Box<dyn ExecutionContext<Req>>;
}

/// The code running inside a thread-backed execution context.
pub trait WorkerHandler<Req, Resp>: Send {
    /// Process one request. `Ok(None)` produces no event.
    fn handle(&mut self, request: Req) -> Result<Option<Resp>, WorkerError>;
}

type HandlerBuilder<H> = Arc<dyn Fn() -> H + Send + Sync>;

/// Spawns one OS thread per execution context, each with its own handler.
pub struct ThreadWorkerFactory<H> {
    name: String,
    build_handler: HandlerBuilder<H>,
    spawned: AtomicUsize,
}

impl<H> ThreadWorkerFactory<H> {
    /// Create a factory. `build_handler` runs once per context.
    pub fn new(name: impl Into<String>, build_handler: impl Fn() -> H + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            build_handler: Arc::new(build_handler),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of contexts created so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl<Req, Resp, H> WorkerFactory<Req, Resp> for ThreadWorkerFactory<H>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    H: WorkerHandler<Req, Resp> + 'static,
{
    fn create(&self, listener: WorkerListener<Resp>) -> Box<dyn ExecutionContext<Req>> {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.name, index);
        let handler = (self.build_handler)();
        Box::new(ThreadContext::spawn(name, handler, listener))
    }
}

/// Execution context backed by a dedicated thread and a flume channel.
pub struct ThreadContext<Req> {
    name: String,
    sender: Option<flume::Sender<Req>>,
    terminated: Arc<AtomicBool>,
}

impl<Req: Send + 'static> ThreadContext<Req> {
    /// Spawn the worker thread.
    pub fn spawn<Resp, H>(name: String, mut handler: H, listener: WorkerListener<Resp>) -> Self
    where
        Resp: Send + 'static,
        H: WorkerHandler<Req, Resp> + 'static,
    {
        let (sender, receiver) = flume::unbounded::<Req>();
        let terminated = Arc::new(AtomicBool::new(false));
        let stop = terminated.clone();
        let thread_name = name.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(worker = %thread_name, "Worker started");
            while let Ok(request) = receiver.recv() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request)));
                if stop.load(Ordering::Acquire) {
                    trace!(worker = %thread_name, "Dropping result of terminated worker");
                    break;
                }
                let event = match outcome {
                    Ok(Ok(Some(response))) => WorkerEvent::Message(response),
                    Ok(Ok(None)) => continue,
                    Ok(Err(e)) => {
                        warn!(worker = %thread_name, error = %e, "Worker request failed");
                        WorkerEvent::Error(e)
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(worker = %thread_name, %message, "Worker panicked");
                        WorkerEvent::Error(WorkerError::Panicked(message))
                    }
                };
                listener(event);
            }
            debug!(worker = %thread_name, "Worker stopped");
        });

        let sender = match spawned {
            Ok(_) => Some(sender),
            Err(e) => {
                warn!(worker = %name, error = %e, "Failed to spawn worker thread");
                terminated.store(true, Ordering::Release);
                None
            }
        };

        Self {
            name,
            sender,
            terminated,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl<Req: Send + 'static> ExecutionContext<Req> for ThreadContext<Req> {
    fn post_message(&self, request: Req) -> Result<(), WorkerError> {
        if self.is_terminated() {
            return Err(WorkerError::Terminated);
        }
        let sender = self.sender.as_ref().ok_or(WorkerError::Terminated)?;
        sender.send(request).map_err(|_| WorkerError::Terminated)
    }

    fn terminate(&mut self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(worker = %self.name, "Terminating worker");
        // Closing the channel ends the thread once its current request returns.
        self.sender = None;
    }
}

impl<Req> Drop for ThreadContext<Req> {
    fn drop(&mut self) {
        self.terminated.store(true, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
