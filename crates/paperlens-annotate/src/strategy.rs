//! Execution strategies for embedding computation.
//!
//! A strategy fans per-document work out to its workers and sends one
//! [`WorkOutcome`] per item back over a bounded channel; persisting the
//! outcomes is the caller's job. `run` blocks, so callers drive it from
//! `spawn_blocking`.

use std::sync::{Arc, Mutex, PoisonError};

use paperlens_db::SectionMap;
use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AnnotateError, Result};
use crate::method::{ComputedSections, EmbeddingMethod, ExecutionBackend, WorkerSlot};

/// Sections of one document, ready for a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub hash_id: String,
    pub sections: SectionMap,
}

#[derive(Debug)]
pub struct WorkOutcome {
    pub hash_id: String,
    pub result: Result<ComputedSections>,
}

pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn workers(&self) -> usize;

    fn run(
        &self,
        method: Arc<dyn EmbeddingMethod>,
        items: Vec<WorkItem>,
        tx: mpsc::Sender<WorkOutcome>,
    ) -> Result<()>;
}

fn compute(method: &dyn EmbeddingMethod, item: WorkItem) -> WorkOutcome {
    WorkOutcome {
        result: method.compute_per_document_vectors(&item.sections),
        hash_id: item.hash_id,
    }
}

fn closed() -> AnnotateError {
    AnnotateError::Worker("outcome receiver closed".to_string())
}

// ── Sequential ──────────────────────────────────────────────────────────────

pub struct Sequential;

impl ExecutionStrategy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn workers(&self) -> usize {
        1
    }

    fn run(
        &self,
        method: Arc<dyn EmbeddingMethod>,
        items: Vec<WorkItem>,
        tx: mpsc::Sender<WorkOutcome>,
    ) -> Result<()> {
        for item in items {
            tx.blocking_send(compute(method.as_ref(), item)).map_err(|_| closed())?;
        }
        Ok(())
    }
}

// ── Thread pool ─────────────────────────────────────────────────────────────

/// Rayon pool sharing the registry's instance across threads.
pub struct ThreadPool {
    workers: usize,
}

impl ThreadPool {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }
}

impl ExecutionStrategy for ThreadPool {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn run(
        &self,
        method: Arc<dyn EmbeddingMethod>,
        items: Vec<WorkItem>,
        tx: mpsc::Sender<WorkOutcome>,
    ) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("embed-thread-{}", i))
            .build()
            .map_err(|e| AnnotateError::Worker(e.to_string()))?;

        pool.install(|| {
            items.into_par_iter().try_for_each_with(tx, |tx, item| {
                tx.blocking_send(compute(method.as_ref(), item)).map_err(|_| closed())
            })
        })
    }
}

// ── Isolated pools ──────────────────────────────────────────────────────────

/// Each worker owns an instance built from `isolated_instance` and
/// initialized on the worker's own thread; nothing is shared with the
/// registry's instance.
pub struct ProcessPool {
    workers: usize,
}

impl ProcessPool {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }
}

impl ExecutionStrategy for ProcessPool {
    fn name(&self) -> &'static str {
        "process-pool"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn run(
        &self,
        method: Arc<dyn EmbeddingMethod>,
        items: Vec<WorkItem>,
        tx: mpsc::Sender<WorkOutcome>,
    ) -> Result<()> {
        run_isolated(self.workers, |_| None, method, items, tx)
    }
}

/// Isolated pool whose worker `i` is pinned to device `i % devices`.
pub struct AffinityPool {
    workers: usize,
    devices: usize,
}

impl AffinityPool {
    pub fn new(workers: usize, devices: usize) -> Self {
        Self {
            workers: workers.max(1),
            devices: devices.max(1),
        }
    }

    pub fn device_for(&self, worker: usize) -> usize {
        worker % self.devices
    }
}

impl ExecutionStrategy for AffinityPool {
    fn name(&self) -> &'static str {
        "affinity-pool"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn run(
        &self,
        method: Arc<dyn EmbeddingMethod>,
        items: Vec<WorkItem>,
        tx: mpsc::Sender<WorkOutcome>,
    ) -> Result<()> {
        run_isolated(self.workers, |i| Some(self.device_for(i)), method, items, tx)
    }
}

type Queue = Arc<Mutex<std::vec::IntoIter<WorkItem>>>;

fn next_item(queue: &Queue) -> Option<WorkItem> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).next()
}

fn worker_loop(
    slot: WorkerSlot,
    method: &dyn EmbeddingMethod,
    queue: &Queue,
    tx: &mpsc::Sender<WorkOutcome>,
) -> Result<usize> {
    let instance = method.isolated_instance(slot)?;
    instance.initialize()?;
    debug!(worker = slot.index, device = ?slot.device, "Isolated worker ready");

    let mut done = 0;
    while let Some(item) = next_item(queue) {
        tx.blocking_send(compute(instance.as_ref(), item)).map_err(|_| closed())?;
        done += 1;
    }
    Ok(done)
}

fn run_isolated(
    workers: usize,
    device_for: impl Fn(usize) -> Option<usize>,
    method: Arc<dyn EmbeddingMethod>,
    items: Vec<WorkItem>,
    tx: mpsc::Sender<WorkOutcome>,
) -> Result<()> {
    let queue: Queue = Arc::new(Mutex::new(items.into_iter()));

    let results: Vec<Result<usize>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let slot = WorkerSlot { index, device: device_for(index) };
                let (method, queue, tx) = (method.clone(), queue.clone(), tx.clone());
                std::thread::Builder::new()
                    .name(format!("embed-worker-{}", index))
                    .spawn_scoped(scope, move || worker_loop(slot, method.as_ref(), &queue, &tx))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(AnnotateError::Worker("worker panicked".to_string()))),
                Err(e) => Err(AnnotateError::Worker(e.to_string())),
            })
            .collect()
    });
    drop(tx);

    let mut first_error = None;
    for result in results {
        if let Err(e) = result {
            warn!("Embedding worker stopped: {}", e);
            first_error.get_or_insert(e);
        }
    }

    // Work left over means no worker survived to drain the queue.
    let leftover = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
    match first_error {
        Some(e) if leftover > 0 => Err(e),
        _ => Ok(()),
    }
}

/// Pick a strategy from the method's declared backend and worker count.
pub fn select_strategy(
    method: &dyn EmbeddingMethod,
    default_workers: usize,
    devices: usize,
) -> Box<dyn ExecutionStrategy> {
    let workers = method.declared_worker_count().unwrap_or(default_workers).max(1);
    match method.declared_backend() {
        Some(ExecutionBackend::Sequential) => Box::new(Sequential),
        Some(ExecutionBackend::Accelerator) => Box::new(AffinityPool::new(workers, devices)),
        Some(ExecutionBackend::CpuProcess) => Box::new(ProcessPool::new(workers)),
        Some(ExecutionBackend::Other) | None => Box::new(ThreadPool::new(workers)),
    }
}
