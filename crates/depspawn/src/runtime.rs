//! Spawn front-end
//!
//! [`Runtime`] owns the worker pool and the dependency registry. Task bodies
//! that spawn nested work capture a [`RuntimeHandle`], which exposes the same
//! operations but does not tear the runtime down when dropped.

use crate::access::{classify, classify_guarded, TaskArg};
use crate::adapter::SchedulerAdapter;
use crate::config::{ExecutionMode, RuntimeConfig};
use crate::context;
use crate::error::{ConfigError, SpawnError, SpawnResult, WaitError, WaitResult};
use crate::executor::{Executor, InlineExecutor, RayonExecutor};
use crate::task::{TaskBody, TaskId, TaskNode, TaskOutcome, TaskState};
use depspawn_metrics::MetricsSnapshot;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Cloneable handle to a runtime
#[derive(Clone)]
pub struct RuntimeHandle {
    adapter: Arc<SchedulerAdapter>,
}

impl RuntimeHandle {
    /// Spawn `body` once every earlier conflicting task is done
    ///
    /// Never blocks on dependencies. The argument tuple is classified on the
    /// calling thread; the body receives the bound arguments on a worker.
    ///
    /// Inside a task body, a subtask may not lock an object that the running
    /// task or one of its ancestors holds a conflicting lock on; that spawn
    /// fails with [`SpawnError::HeldByAncestor`]. Pass such objects as claims.
    ///
    /// # Example
    ///
    /// ```
    /// use depspawn::{Runtime, Shared};
    ///
    /// let rt = Runtime::new(Default::default())?;
    /// let total = Shared::new(0u64);
    /// for i in 1..=10u64 {
    ///     rt.spawn((total.write(), i), |(mut total, i)| *total += i)?;
    /// }
    /// rt.wait()?;
    /// assert_eq!(*total.get(), 55);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn spawn<A, F, O>(&self, args: A, body: F) -> SpawnResult<TaskHandle>
    where
        A: TaskArg,
        F: FnOnce(A::Bound) -> O + Send + 'static,
        O: TaskOutcome,
    {
        if self.adapter.is_closed() {
            return Err(SpawnError::Shutdown);
        }
        let classified = classify_guarded(&args, self.adapter.config().overlap_detection)?;
        let parent = self.adapter.current_task();
        let owner = parent.as_ref().map(|p| p.id());
        if let Some((ancestor, object)) = parent
            .as_ref()
            .and_then(|p| p.held_by_lineage(&classified.guarded))
        {
            return Err(SpawnError::HeldByAncestor { object, ancestor });
        }
        let body: TaskBody = Box::new(move || body(args.bind()).into_outcome());
        let node = Arc::new(
            TaskNode::new(self.adapter.next_task_id(), parent, classified.descriptors, Some(body))
                .with_guards(classified.guarded),
        );
        self.adapter.spawn_node(Arc::clone(&node));
        context::record_spawn(self.adapter.id(), owner, &node);
        Ok(TaskHandle {
            node,
            adapter: Arc::clone(&self.adapter),
        })
    }

    /// Block until every spawned task is done
    ///
    /// Returns the failures recorded since the previous wait. Inside a task
    /// body this is refused; use [`wait_for_subtasks`](Self::wait_for_subtasks).
    pub fn wait(&self) -> WaitResult<()> {
        if let Some(task) = self.adapter.current_task() {
            return Err(WaitError::InsideTask(task.id()));
        }
        self.adapter.wait_idle();
        let failures = self.adapter.take_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WaitError::TaskFailed(failures))
        }
    }

    /// Block until every earlier writer of the given objects is done
    ///
    /// Accesses are treated as reads, so earlier readers may still be active
    /// on return. Failures are not drained.
    pub fn wait_for<A: TaskArg>(&self, args: A) -> SpawnResult<()> {
        if self.adapter.is_closed() {
            return Err(SpawnError::Shutdown);
        }
        let descriptors = classify(&args, self.adapter.config().overlap_detection)?.as_reads();
        let sentinel = Arc::new(
            TaskNode::new(
                self.adapter.next_task_id(),
                self.adapter.current_task(),
                descriptors,
                None,
            )
            .as_barrier(),
        );
        self.adapter.spawn_node(Arc::clone(&sentinel));
        self.adapter.wait_task(&sentinel);
        Ok(())
    }

    /// Block until the subtasks of the running task are done
    ///
    /// Outside a task body this is [`wait`](Self::wait).
    pub fn wait_for_subtasks(&self) -> WaitResult<()> {
        match self.adapter.current_task() {
            Some(task) => {
                self.adapter.wait_children(&task);
                Ok(())
            }
            None => self.wait(),
        }
    }

    /// Open a scoped barrier on the calling thread
    ///
    /// Dropping the returned [`Observer`] blocks until every task spawned from
    /// the current context since its creation, together with their subtasks,
    /// is done. Spawns made by other threads or other tasks are not observed.
    pub fn observer(&self) -> Observer {
        let owner = self.adapter.current_task().map(|t| t.id());
        Observer {
            adapter: Arc::clone(&self.adapter),
            frame: context::open_frame(self.adapter.id(), owner),
            _thread: PhantomData,
        }
    }

    /// Run `f`, then wait for every task it spawned from this context
    ///
    /// # Example
    ///
    /// ```
    /// use depspawn::{Runtime, Shared};
    ///
    /// let rt = Runtime::new(Default::default())?;
    /// let x = Shared::new(0u32);
    /// rt.sync(|| {
    ///     rt.spawn(x.write(), |mut x| *x += 1)?;
    ///     rt.spawn(x.write(), |mut x| *x *= 10)
    /// })?;
    /// assert_eq!(*x.get(), 10);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn sync<R>(&self, f: impl FnOnce() -> R) -> R {
        let _observer = self.observer();
        f()
    }

    /// Number of worker threads
    pub fn num_threads(&self) -> usize {
        self.adapter.executor().num_threads()
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        self.adapter.config()
    }

    /// Snapshot of the runtime metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.adapter.metrics().snapshot()
    }

    /// Tasks spawned but not yet done
    pub fn pending_tasks(&self) -> usize {
        self.adapter.outstanding()
    }

    /// Objects that currently have in-flight accesses
    pub fn tracked_objects(&self) -> usize {
        self.adapter.registry().tracked_objects()
    }

    /// In-flight accesses across all objects
    pub fn active_accesses(&self) -> usize {
        self.adapter.registry().active_accesses()
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.adapter.id())
            .field("pending", &self.adapter.outstanding())
            .finish()
    }
}

/// Dependency-tracking task runtime
///
/// Dropping the runtime waits for every outstanding task.
pub struct Runtime {
    handle: RuntimeHandle,
}

impl Runtime {
    /// Start a runtime
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let executor: Arc<dyn Executor> = match config.mode {
            ExecutionMode::Parallel => Arc::new(RayonExecutor::new(&config)?),
            ExecutionMode::Sequential => Arc::new(InlineExecutor::new()),
        };
        Ok(Self::with_executor(config, executor))
    }

    /// Start a runtime configured from the `DEPSPAWN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(RuntimeConfig::from_env()?)
    }

    /// Start a runtime on a custom executor
    pub fn with_executor(config: RuntimeConfig, executor: Arc<dyn Executor>) -> Self {
        info!(
            threads = executor.num_threads(),
            mode = ?config.mode,
            overlap_detection = config.overlap_detection,
            "runtime started"
        );
        Self {
            handle: RuntimeHandle {
                adapter: Arc::new(SchedulerAdapter::new(config, executor)),
            },
        }
    }

    /// Handle for spawning from inside task bodies
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Wait for every task, then stop accepting new ones
    pub fn shutdown(self) -> WaitResult<()> {
        let result = self.handle.wait();
        self.handle.adapter.close();
        result
    }
}

impl Deref for Runtime {
    type Target = RuntimeHandle;

    fn deref(&self) -> &RuntimeHandle {
        &self.handle
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runtime").field(&self.handle).finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let adapter = &self.handle.adapter;
        if adapter.is_closed() {
            return;
        }
        if adapter.current_task().is_some() {
            error!("runtime dropped inside one of its own tasks; outstanding tasks are not awaited");
            adapter.close();
            return;
        }
        adapter.wait_idle();
        adapter.close();
        let failures = adapter.take_failures();
        if !failures.is_empty() {
            let count = failures.len();
            error!(
                count,
                "runtime dropped with unreported task failures: {}",
                WaitError::TaskFailed(failures)
            );
        }
    }
}

/// Scoped barrier over the tasks spawned from one context
///
/// Bound to the thread that created it. Failures stay queued for the next
/// `wait()`.
pub struct Observer {
    adapter: Arc<SchedulerAdapter>,
    frame: u64,
    _thread: PhantomData<*const ()>,
}

impl Observer {
    /// Tasks recorded so far
    pub fn observed(&self) -> usize {
        context::frame_len(self.frame)
    }

    /// Block until the recorded tasks are done and stop observing
    pub fn wait(self) {
        drop(self);
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let spawned = context::close_frame(self.frame);
        debug!(frame = self.frame, tasks = spawned.len(), "observer waiting");
        for node in &spawned {
            self.adapter.wait_task(node);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("frame", &self.frame)
            .field("observed", &self.observed())
            .finish()
    }
}

/// Handle to one spawned task
pub struct TaskHandle {
    node: Arc<TaskNode>,
    adapter: Arc<SchedulerAdapter>,
}

impl TaskHandle {
    /// Task id
    pub fn id(&self) -> TaskId {
        self.node.id()
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.node.state()
    }

    /// Check whether the task and its subtasks are done
    pub fn is_done(&self) -> bool {
        self.node.is_done()
    }

    /// Block until the task and its subtasks are done
    ///
    /// Failures stay queued for the next `wait()`.
    pub fn join(&self) {
        self.adapter.wait_task(&self.node);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.node.id())
            .field("state", &self.node.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Shared;

    fn runtime(threads: usize) -> Runtime {
        Runtime::new(RuntimeConfig::new().with_threads(threads)).unwrap()
    }

    #[test]
    fn test_wait_when_idle() {
        let rt = runtime(2);
        assert!(rt.wait().is_ok());
        assert_eq!(rt.pending_tasks(), 0);
    }

    #[test]
    fn test_chain_of_writes() {
        let rt = runtime(4);
        let log = Shared::new(Vec::new());
        for i in 0..100 {
            rt.spawn((log.write(), i), |(mut log, i)| log.push(i)).unwrap();
        }
        rt.wait().unwrap();
        assert_eq!(*log.get(), (0..100).collect::<Vec<_>>());
        assert_eq!(rt.tracked_objects(), 0);
    }

    #[test]
    fn test_wait_inside_task_is_refused() {
        let rt = runtime(2);
        let handle = rt.handle();
        let seen = Shared::new(None);
        rt.spawn(seen.write(), move |mut seen| {
            *seen = Some(handle.wait());
        })
        .unwrap();
        rt.wait().unwrap();

        let result = seen.get().clone().unwrap();
        assert!(matches!(result, Err(WaitError::InsideTask(_))));
    }

    #[test]
    fn test_drop_with_unreported_failures() {
        let rt = runtime(2);
        let value = Shared::new(0u32);
        rt.spawn(value.write(), |_v| -> Result<(), String> { Err("lost".to_string()) })
            .unwrap();
        rt.spawn(value.write(), |mut v| *v = 4).unwrap();
        drop(rt);
        assert_eq!(*value.get(), 4);
    }

    #[test]
    fn test_task_handle_join() {
        let rt = runtime(2);
        let value = Shared::new(0);
        let task = rt.spawn(value.write(), |mut v| *v = 9).unwrap();
        task.join();
        assert!(task.is_done());
        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(*value.get(), 9);
    }

    #[test]
    fn test_spawn_after_shutdown() {
        let rt = runtime(1);
        let handle = rt.handle();
        rt.shutdown().unwrap();

        let err = handle.spawn((), |()| ()).unwrap_err();
        assert_eq!(err, SpawnError::Shutdown);
    }

    #[test]
    fn test_with_executor() {
        let rt = Runtime::with_executor(RuntimeConfig::new(), Arc::new(InlineExecutor::new()));
        assert_eq!(rt.num_threads(), 1);
        let x = Shared::new(1);
        rt.spawn(x.write(), |mut x| *x += 1).unwrap();
        // Inline execution completes before spawn returns
        assert_eq!(*x.get(), 2);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = Runtime::new(RuntimeConfig::new().with_threads(0)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreadCount(0)));
    }
}
