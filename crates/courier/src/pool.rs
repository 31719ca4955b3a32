//! Worker pool the dispatcher hands non-inline invocations to.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use courier_config::Config;

use crate::dispatch::DispatchError;

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Unit of work queued on an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task the executor refused, handed back so the caller can run it.
pub struct RejectedTask {
    task: Task,
    error: DispatchError,
}

impl RejectedTask {
    /// Pairs a refused task with the reason.
    pub fn new(task: Task, error: DispatchError) -> Self {
        Self { task, error }
    }

    /// Why the task was refused.
    #[must_use]
    pub fn error(&self) -> &DispatchError {
        &self.error
    }

    /// Recovers the task.
    #[must_use]
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl fmt::Debug for RejectedTask {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RejectedTask")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Seam through which the dispatcher hands work off.
pub trait TaskExecutor: Send + Sync {
    /// Queues a task.
    ///
    /// # Errors
    ///
    /// Returns the task when the executor no longer accepts work.
    fn execute(&self, task: Task) -> Result<(), RejectedTask>;
}

impl<T> TaskExecutor for Arc<T>
where
    T: TaskExecutor + ?Sized,
{
    fn execute(&self, task: Task) -> Result<(), RejectedTask> {
        (**self).execute(task)
    }
}

/// Fixed set of named worker threads sharing one queue.
///
/// A panicking task is logged and does not take its worker down.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `threads` workers named `<prefix>-<index>`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerSpawn`] if a thread cannot be spawned;
    /// workers already started are shut down first.
    pub fn new(threads: usize, name_prefix: &str) -> Result<Self, DispatchError> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(threads)),
            size: threads,
        };
        for index in 0..threads {
            let name = format!("{name_prefix}-{index}");
            let queue = Arc::clone(&receiver);
            let worker_name = name.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&queue, &worker_name));
            match spawned {
                Ok(handle) => lock(&pool.workers).push(handle),
                Err(source) => {
                    pool.shutdown();
                    return Err(DispatchError::worker_spawn(name, source));
                }
            }
        }
        debug!(target: POOL_TARGET, threads, prefix = name_prefix, "worker pool started");
        Ok(pool)
    }

    /// Builds the configured pool, or `None` when the pool is disabled.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkerPool::new`] failures.
    pub fn from_config(config: &Config) -> Result<Option<Self>, DispatchError> {
        if !config.pool_enabled() {
            return Ok(None);
        }
        Self::new(config.worker_threads(), config.worker_name_prefix()).map(Some)
    }

    /// Number of workers the pool was built with.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the pool still accepts tasks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Closes the queue and joins the workers. Queued tasks still run.
    ///
    /// Calling this from a worker skips joining that worker.
    pub fn shutdown(&self) {
        drop(lock(&self.sender).take());
        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let name = worker.thread().name().unwrap_or("worker").to_owned();
            if worker.join().is_err() {
                warn!(target: POOL_TARGET, worker = %name, "worker exited abnormally");
            }
        }
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, task: Task) -> Result<(), RejectedTask> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(RejectedTask::new(task, DispatchError::PoolShutDown));
        };
        sender
            .send(task)
            .map_err(|mpsc::SendError(task)| RejectedTask::new(task, DispatchError::PoolShutDown))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(queue: &Mutex<Receiver<Task>>, name: &str) {
    loop {
        let next = lock(queue).recv();
        let Ok(task) = next else {
            debug!(target: POOL_TARGET, worker = name, "worker stopping");
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            warn!(
                target: POOL_TARGET,
                worker = name,
                panic = %panic_message(&*payload),
                "task panicked"
            );
        }
    }
}

// The guarded values stay consistent across a panic, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renders a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
