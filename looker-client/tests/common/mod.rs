//! Shared test doubles: a worker factory whose contexts record posted
//! messages and let the test deliver responses by hand.

#![allow(dead_code)]

use looker_worker::{ExecutionContext, WorkerError, WorkerEvent, WorkerFactory, WorkerListener};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One context created by a [`ManualFactory`].
pub struct ManualWorker<Req, Resp> {
    listener: WorkerListener<Resp>,
    posted: Mutex<Vec<Req>>,
    terminated: AtomicBool,
}

impl<Req: Clone, Resp> ManualWorker<Req, Resp> {
    pub fn posted(&self) -> Vec<Req> {
        self.posted.lock().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Deliver an event as if the worker produced it.
    pub fn deliver(&self, event: WorkerEvent<Resp>) {
        (self.listener)(event);
    }

    pub fn respond(&self, response: Resp) {
        self.deliver(WorkerEvent::Message(response));
    }

    pub fn fail(&self, error: WorkerError) {
        self.deliver(WorkerEvent::Error(error));
    }
}

struct ManualContext<Req, Resp> {
    worker: Arc<ManualWorker<Req, Resp>>,
}

impl<Req: Send, Resp> ExecutionContext<Req> for ManualContext<Req, Resp>
where
    ManualWorker<Req, Resp>: Send + Sync,
{
    fn post_message(&self, request: Req) -> Result<(), WorkerError> {
        if self.worker.terminated.load(Ordering::SeqCst) {
            return Err(WorkerError::Terminated);
        }
        self.worker.posted.lock().push(request);
        Ok(())
    }

    fn terminate(&mut self) {
        self.worker.terminated.store(true, Ordering::SeqCst);
    }
}

/// Worker factory keeping a handle to every context it creates.
pub struct ManualFactory<Req, Resp> {
    workers: Mutex<Vec<Arc<ManualWorker<Req, Resp>>>>,
}

impl<Req, Resp> ManualFactory<Req, Resp> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn worker(&self, index: usize) -> Arc<ManualWorker<Req, Resp>> {
        self.workers.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<ManualWorker<Req, Resp>> {
        let workers = self.workers.lock();
        workers[workers.len() - 1].clone()
    }
}

impl<Req, Resp> WorkerFactory<Req, Resp> for ManualFactory<Req, Resp>
where
    Req: Send + 'static,
    Resp: 'static,
    ManualWorker<Req, Resp>: Send + Sync,
{
    fn create(&self, listener: WorkerListener<Resp>) -> Box<dyn ExecutionContext<Req>> {
        let worker = Arc::new(ManualWorker {
            listener,
            posted: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        });
        self.workers.lock().push(worker.clone());
        Box::new(ManualContext { worker })
    }
}
