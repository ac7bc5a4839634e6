use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::pipeline::CancelFlag;
use crate::worker::credential::CredentialTurn;

/// One scheduled job execution.
pub struct WorkItem {
    pub job_id: String,
    pub cancel: CancelFlag,
    turn: Option<CredentialTurn>,
}

impl WorkItem {
    pub fn new(job_id: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            job_id: job_id.into(),
            cancel,
            turn: None,
        }
    }

    /// Attaches the credential turn, held until the item is dropped.
    pub fn with_turn(mut self, turn: CredentialTurn) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn is_ready(&mut self) -> bool {
        self.turn.as_mut().map_or(true, CredentialTurn::is_ready)
    }

    pub async fn wait_turn(&mut self) {
        if let Some(turn) = self.turn.as_mut() {
            turn.wait().await;
        }
    }
}

/// Executes work items on behalf of the pool.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, item: WorkItem);

    /// Called when `run` panicked for `job_id`.
    fn panicked(&self, job_id: &str, message: &str);
}

/// Fixed number of tokio tasks draining one shared queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0, or when called outside a tokio runtime.
    pub fn new(worker_count: usize, runner: Arc<dyn JobRunner>) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (sender, receiver) = mpsc::unbounded_channel::<WorkItem>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let runner = Arc::clone(&runner);
                tokio::spawn(run_worker(worker_id, receiver, runner))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            shutdown,
            worker_count,
        }
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }
        let sender = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match sender.as_ref() {
            Some(sender) => sender.send(item).map_err(|_| WorkerError::ChannelClosed),
            None => Err(WorkerError::ChannelClosed),
        }
    }

    /// Stops accepting new items. Items already queued are still executed.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down worker pool...");
        let mut sender = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sender.take();
    }

    /// Waits for every worker to drain the queue and exit.
    pub async fn wait(&self) {
        self.shutdown();
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} stopped abnormally: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    runner: Arc<dyn JobRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(item) = next else {
            debug!("Worker {} job channel closed", worker_id);
            break;
        };

        let job_id = item.job_id.clone();
        debug!("Worker {} picked up job {}", worker_id, job_id);

        if let Err(panic) = AssertUnwindSafe(runner.run(item)).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!("Worker {} caught a panic in job {}: {}", worker_id, job_id, message);
            runner.panicked(&job_id, &message);
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job execution panicked".to_string()
    }
}
