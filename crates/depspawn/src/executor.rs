//! Execution substrates for ready tasks
//!
//! The engine only needs to hand ready jobs to some pool and, while a task
//! waits, to help the pool make progress. [`RayonExecutor`] runs jobs on a
//! dedicated rayon pool; [`InlineExecutor`] runs them on the submitting thread.

use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

/// Unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool that runs ready tasks
pub trait Executor: Send + Sync {
    /// Queue a job; it may run on any thread, including the caller's
    fn submit(&self, job: Job);

    /// Number of threads that run jobs
    fn num_threads(&self) -> usize;

    /// Run one queued job on the calling thread if possible
    ///
    /// Returns true if a job was executed. Called by tasks that block on
    /// other tasks so that workers do not sit idle.
    fn help(&self) -> bool;
}

/// Executor backed by a dedicated rayon thread pool
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    /// Start a pool sized from the configuration
    pub fn new(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let name = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .thread_name(move |i| format!("{name}-{i}"))
            .build()?;
        Ok(Self { pool })
    }
}

impl Executor for RayonExecutor {
    fn submit(&self, job: Job) {
        self.pool.spawn(job);
    }

    fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn help(&self) -> bool {
        // Only workers of this pool can pick up its jobs
        if self.pool.current_thread_index().is_none() {
            return false;
        }
        matches!(self.pool.yield_now(), Some(rayon::Yield::Executed))
    }
}

impl fmt::Debug for RayonExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonExecutor")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

thread_local! {
    static INLINE_QUEUE: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Executor that runs every job on the submitting thread
///
/// A job submitted from inside another job is queued and runs once the
/// outer one returns, or earlier if the outer one waits and helps.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Create an inline executor
    pub fn new() -> Self {
        Self
    }

    fn pop() -> Option<Job> {
        INLINE_QUEUE.with(|queue| queue.borrow_mut().pop_front())
    }
}

/// Clears the draining flag even if a job unwinds
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

impl Executor for InlineExecutor {
    fn submit(&self, job: Job) {
        INLINE_QUEUE.with(|queue| queue.borrow_mut().push_back(job));
        if DRAINING.with(|draining| draining.replace(true)) {
            return;
        }
        let _guard = DrainGuard;
        while let Some(job) = Self::pop() {
            job();
        }
    }

    fn num_threads(&self) -> usize {
        1
    }

    fn help(&self) -> bool {
        match Self::pop() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}
