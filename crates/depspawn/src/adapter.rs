//! Scheduler adapter: runs ready tasks and completes them
//!
//! Completion of a task happens when its body returned and every subtask it
//! spawned is done. At that point the task's accesses are released, newly
//! ready successors are submitted and the parent is told one subtask less is
//! outstanding.

use crate::config::RuntimeConfig;
use crate::context;
use crate::error::TaskFailure;
use crate::executor::Executor;
use crate::registry::DependencyRegistry;
use crate::task::{TaskId, TaskNode};
use depspawn_metrics::{timed, RuntimeMetrics};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

static NEXT_RUNTIME: AtomicU64 = AtomicU64::new(1);

/// Interval at which a blocked waiter rechecks its condition
const PARK_INTERVAL: Duration = Duration::from_millis(1);

/// Shared core of a runtime
pub(crate) struct SchedulerAdapter {
    id: u64,
    config: RuntimeConfig,
    registry: DependencyRegistry,
    executor: Arc<dyn Executor>,
    metrics: RuntimeMetrics,
    next_task: AtomicU64,
    outstanding: Mutex<usize>,
    idle: Condvar,
    failures: Mutex<Vec<TaskFailure>>,
    closed: AtomicBool,
}

impl SchedulerAdapter {
    pub(crate) fn new(config: RuntimeConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            id: NEXT_RUNTIME.fetch_add(1, Ordering::Relaxed),
            config,
            registry: DependencyRegistry::new(),
            executor,
            metrics: RuntimeMetrics::new(),
            next_task: AtomicU64::new(1),
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
            failures: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub(crate) fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub(crate) fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    /// Task of this runtime running on the calling thread
    pub(crate) fn current_task(&self) -> Option<Arc<TaskNode>> {
        context::current_task(self.id)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ==================== Spawning ====================

    /// Register a new task and submit it if nothing precedes it
    pub(crate) fn spawn_node(self: &Arc<Self>, node: Arc<TaskNode>) {
        if let Some(parent) = node.parent() {
            parent.add_child();
        }
        *self.outstanding.lock() += 1;

        let predecessors = self.registry.register(&node);
        if !node.is_barrier() {
            self.metrics.record_spawn(predecessors);
        }
        debug!(
            task = %node.id(),
            parent = ?node.parent().map(|p| p.id()),
            depth = node.lineage().map_or(0, |l| l.depth()),
            objects = node.descriptors().len(),
            predecessors,
            "spawned"
        );

        if node.resolve_predecessor() {
            self.submit(node);
        }
    }

    fn submit(self: &Arc<Self>, node: Arc<TaskNode>) {
        trace!(task = %node.id(), "ready");
        let adapter = Arc::clone(self);
        self.executor.submit(Box::new(move || adapter.run(node)));
    }

    // ==================== Execution ====================

    fn run(self: &Arc<Self>, node: Arc<TaskNode>) {
        node.start_running();
        let outcome = match node.take_body() {
            Some(body) => {
                let _scope = context::enter(self.id, Arc::clone(&node));
                timed!(self.metrics.run_time(), {
                    catch_unwind(AssertUnwindSafe(body))
                })
            }
            None => Ok(Ok(())),
        };

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(message)) => Some((message, false)),
            Err(payload) => Some((panic_message(payload.as_ref()), true)),
        };
        if let Some((message, panicked)) = failure {
            let failure = TaskFailure {
                task: node.id(),
                message,
                panicked,
            };
            error!(task = %failure.task, panicked, "{}", failure);
            self.metrics.record_failure();
            self.failures.lock().push(failure);
        }

        self.finish(node);
    }

    /// Count one finished unit of `node`, completing it and its ancestors
    /// as they run out of pending work
    fn finish(self: &Arc<Self>, node: Arc<TaskNode>) {
        let mut current = node;
        loop {
            if !current.finish_one() {
                return;
            }
            let ready = self.registry.release(&current);
            current.mark_done();
            if !current.is_barrier() {
                self.metrics.record_completion();
            }
            debug!(task = %current.id(), successors = ready.len(), "completed");
            for succ in ready {
                self.submit(succ);
            }

            let parent = current.parent().cloned();
            self.task_done();
            match parent {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }

    fn task_done(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    // ==================== Waiting ====================

    pub(crate) fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Block until no task is outstanding
    pub(crate) fn wait_idle(&self) {
        loop {
            if self.outstanding() == 0 {
                return;
            }
            if self.executor.help() {
                continue;
            }
            let mut outstanding = self.outstanding.lock();
            if *outstanding == 0 {
                return;
            }
            self.idle.wait_for(&mut outstanding, PARK_INTERVAL * 10);
        }
    }

    /// Block until `node` is done, running other work meanwhile if possible
    pub(crate) fn wait_task(&self, node: &TaskNode) {
        while !node.is_done() {
            if !self.executor.help() {
                node.park(PARK_INTERVAL);
            }
        }
    }

    /// Block until every subtask of `node` is done
    pub(crate) fn wait_children(&self, node: &TaskNode) {
        while node.live_children() > 0 {
            if !self.executor.help() {
                node.park(PARK_INTERVAL);
            }
        }
    }

    /// Drain the failures recorded since the previous call
    pub(crate) fn take_failures(&self) -> Vec<TaskFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AccessMode, DescriptorSet, ObjectDescriptor, ObjectId};
    use crate::executor::InlineExecutor;
    use crate::task::{TaskBody, TaskState};

    fn adapter() -> Arc<SchedulerAdapter> {
        Arc::new(SchedulerAdapter::new(
            RuntimeConfig::new().sequential(),
            Arc::new(InlineExecutor::new()),
        ))
    }

    fn node(
        adapter: &SchedulerAdapter,
        descs: Vec<ObjectDescriptor>,
        body: Option<TaskBody>,
    ) -> Arc<TaskNode> {
        Arc::new(TaskNode::new(
            adapter.next_task_id(),
            adapter.current_task(),
            DescriptorSet::coalesce(descs),
            body,
        ))
    }

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }

    #[test]
    fn test_inline_task_completes_immediately() {
        let adapter = adapter();
        let task = node(&adapter, vec![], None);
        adapter.spawn_node(Arc::clone(&task));

        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(adapter.outstanding(), 0);
        assert_eq!(adapter.metrics().completed(), 1);
    }

    #[test]
    fn test_barrier_is_not_counted() {
        let adapter = adapter();
        let obj = ObjectId::from_raw(1);
        let barrier = Arc::new(
            TaskNode::new(
                adapter.next_task_id(),
                None,
                DescriptorSet::coalesce(vec![ObjectDescriptor::whole(obj, AccessMode::Read)]),
                None,
            )
            .as_barrier(),
        );
        adapter.spawn_node(Arc::clone(&barrier));

        assert!(barrier.is_done());
        assert_eq!(adapter.outstanding(), 0);
        let metrics = adapter.metrics().snapshot();
        assert_eq!(metrics.spawned, 0);
        assert_eq!(metrics.completed, 0);
        assert_eq!(metrics.predecessors.count, 0);
    }

    #[test]
    fn test_failure_is_recorded_once() {
        let adapter = adapter();
        let body: TaskBody = Box::new(|| Err("bad input".to_string()));
        let task = node(&adapter, vec![], Some(body));
        adapter.spawn_node(Arc::clone(&task));

        let failures = adapter.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, task.id());
        assert!(!failures[0].panicked);
        assert!(adapter.take_failures().is_empty());
    }

    #[test]
    fn test_panicking_task_still_releases() {
        let adapter = adapter();
        let obj = ObjectId::from_raw(1);
        let body: TaskBody = Box::new(|| panic!("boom"));
        let task = node(
            &adapter,
            vec![ObjectDescriptor::whole(obj, AccessMode::Write)],
            Some(body),
        );
        adapter.spawn_node(task);

        assert_eq!(adapter.registry().tracked_objects(), 0);
        let failures = adapter.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].panicked);
        assert_eq!(failures[0].message, "boom");
    }

    #[test]
    fn test_parent_waits_for_children() {
        let adapter = adapter();
        let inner = Arc::clone(&adapter);
        let child_slot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&child_slot);

        let body: TaskBody = Box::new(move || {
            let child = node(&inner, vec![], None);
            *slot.lock() = Some(Arc::clone(&child));
            inner.spawn_node(child);
            Ok(())
        });
        let parent = node(&adapter, vec![], Some(body));
        adapter.spawn_node(Arc::clone(&parent));

        let child = child_slot.lock().take().unwrap();
        assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));
        assert!(child.is_done());
        assert!(parent.is_done());
        assert_eq!(adapter.outstanding(), 0);
    }
}
