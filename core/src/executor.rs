//! Execution contexts.
//!
//! Continuations, producer tasks and queued work never run on the thread that
//! registered them. They are handed to an [`Executor`], which decides where
//! and when the job runs:
//!
//! - [`WorkerPool`]: many jobs at once on a tokio runtime's blocking pool
//! - [`SerialQueue`]: one job at a time, in submission order, on a dedicated thread
//!
//! [`background`] is the shared default multi-worker context.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use pledge_config::PoolConfig;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to an executor.
pub type ExecutionContext = Arc<dyn Executor>;

pub trait Executor: Send + Sync + 'static {
    /// Schedule `job`. Must not run it on the calling thread before returning.
    fn execute(&self, job: Job);

    /// Schedule `job` to run once `delay` has elapsed.
    ///
    /// The default sleeps inside a regular job, occupying a worker for the
    /// duration of the delay.
    fn execute_after(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            self.execute(job);
            return;
        }
        self.execute(Box::new(move || {
            thread::sleep(delay);
            job();
        }));
    }

    fn name(&self) -> &str;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Run a job, containing any panic so the worker thread survives.
fn run_guarded(context: &str, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(
            context,
            panic = panic_message(payload.as_ref()),
            "Job panicked"
        );
    }
}

/// Multi-worker context backed by a tokio runtime.
///
/// Jobs may block (including on [`crate::Future::wait`]), so they run on the
/// runtime's blocking pool rather than on its async workers. Delayed jobs use
/// the runtime timer.
pub struct WorkerPool {
    handle: Handle,
    runtime: Option<Runtime>,
    name: Arc<str>,
}

impl WorkerPool {
    pub fn new() -> io::Result<Self> {
        Self::from_config(&PoolConfig::default())
    }

    pub fn from_config(config: &PoolConfig) -> io::Result<Self> {
        let name = config.thread_name();
        let mut builder = Builder::new_multi_thread();
        builder.enable_time().thread_name(name.clone());
        if let Some(workers) = config.worker_threads {
            builder.worker_threads(workers.max(1));
        }
        if let Some(max_blocking) = config.max_blocking_threads {
            builder.max_blocking_threads(max_blocking.max(1));
        }
        let runtime = builder.build()?;
        tracing::debug!(
            name = %name,
            worker_threads = ?config.worker_threads,
            max_blocking_threads = ?config.max_blocking_threads,
            "Worker pool started"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            name: name.into(),
        })
    }

    /// Run jobs on a runtime owned by the caller. The runtime must have its
    /// timer enabled for [`Executor::execute_after`].
    #[must_use]
    pub fn on_handle(handle: Handle, name: impl Into<String>) -> Self {
        Self {
            handle,
            runtime: None,
            name: name.into().into(),
        }
    }

    #[must_use]
    pub fn into_context(self) -> ExecutionContext {
        Arc::new(self)
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let name = Arc::clone(&self.name);
        drop(self.handle.spawn_blocking(move || run_guarded(&name, job)));
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            self.execute(job);
            return;
        }
        let handle = self.handle.clone();
        let name = Arc::clone(&self.name);
        drop(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            drop(handle.spawn_blocking(move || run_guarded(&name, job)));
        }));
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // A pool may be dropped from one of its own jobs; never block here.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Single-threaded context: jobs run one at a time in submission order.
pub struct SerialQueue {
    sender: mpsc::UnboundedSender<Job>,
    name: Arc<str>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let name: Arc<str> = name.into().into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker_name = Arc::clone(&name);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    run_guarded(&worker_name, job);
                }
                tracing::debug!(name = %worker_name, "Serial queue drained");
            })?;

        Ok(Self { sender, name })
    }

    #[must_use]
    pub fn into_context(self) -> ExecutionContext {
        Arc::new(self)
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!(name = %self.name, "Serial queue worker is gone; job dropped");
        }
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            self.execute(job);
            return;
        }
        // Sleep off-queue so the delay doesn't stall jobs behind it.
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-timer", self.name))
            .spawn(move || {
                thread::sleep(delay);
                drop(sender.send(job));
            });
        if let Err(err) = spawned {
            tracing::warn!(name = %self.name, error = %err, "Failed to start delay timer");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .finish()
    }
}

static BACKGROUND: OnceLock<ExecutionContext> = OnceLock::new();

/// Install the shared default context from configuration.
///
/// Returns `Ok(false)` if the default context was already created, in which
/// case the configuration is ignored.
pub fn init_background(config: &PoolConfig) -> io::Result<bool> {
    if BACKGROUND.get().is_some() {
        return Ok(false);
    }
    let pool = WorkerPool::from_config(config)?;
    Ok(BACKGROUND.set(pool.into_context()).is_ok())
}

/// The shared default multi-worker context, created on first use.
///
/// # Panics
///
/// Panics if the default worker pool's runtime cannot be started.
pub fn background() -> ExecutionContext {
    Arc::clone(BACKGROUND.get_or_init(|| match WorkerPool::new() {
        Ok(pool) => pool.into_context(),
        Err(err) => panic!("failed to start default worker pool: {err}"),
    }))
}
