//! Task nodes: one per spawned call
//!
//! A node carries the call's descriptors, its pending-predecessor count, its
//! successor list and the bookkeeping that links nested tasks to their parent.

use crate::descriptor::{DescriptorSet, ObjectDescriptor, ObjectId};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Task identifier, unique within a runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting for predecessors
    Pending = 0,
    /// Submitted to the executor
    Ready = 1,
    /// Body is executing
    Running = 2,
    /// Body and all subtasks finished
    Done = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Pending,
            1 => TaskState::Ready,
            2 => TaskState::Running,
            _ => TaskState::Done,
        }
    }
}

/// Position of a task in sequential program order
///
/// Root tasks get `[n]` in spawn order; the k-th child of a task with lineage
/// `L` gets `L ++ [k]`. Lexicographic order matches the order in which a
/// sequential execution would have run the calls.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Lineage(Vec<u64>);

impl Lineage {
    /// Lineage of a root task
    pub fn root(seq: u64) -> Self {
        Self(vec![seq])
    }

    /// Lineage of a child
    pub fn child(&self, seq: u64) -> Self {
        let mut path = self.0.clone();
        path.push(seq);
        Self(path)
    }

    /// Nesting depth; root tasks have depth 1
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Check whether `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Lineage) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seq) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seq}")?;
        }
        Ok(())
    }
}

/// Type-erased task body
pub(crate) type TaskBody = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

/// Return type of a task body
///
/// `()` always succeeds; a `Result` reports its error as a task failure.
pub trait TaskOutcome {
    /// Convert into the engine's failure representation
    fn into_outcome(self) -> Result<(), String>;
}

impl TaskOutcome for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> TaskOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

/// One spawned call
pub(crate) struct TaskNode {
    id: TaskId,
    parent: Option<Arc<TaskNode>>,
    lineage: OnceLock<Lineage>,
    next_child: AtomicU64,
    descriptors: DescriptorSet,
    /// Accesses the body holds a lock for while it runs
    guarded: Vec<ObjectDescriptor>,
    /// Bodiless node standing in for a `wait_for` caller
    barrier: bool,
    /// Unfinished predecessors plus one registration guard
    pending: AtomicUsize,
    /// Unfinished subtasks plus one for the body itself
    children: AtomicUsize,
    state: AtomicU8,
    /// `None` once the task released its accesses
    successors: Mutex<Option<Vec<Weak<TaskNode>>>>,
    body: Mutex<Option<TaskBody>>,
    done: Mutex<bool>,
    signal: Condvar,
}

impl TaskNode {
    pub(crate) fn new(
        id: TaskId,
        parent: Option<Arc<TaskNode>>,
        descriptors: DescriptorSet,
        body: Option<TaskBody>,
    ) -> Self {
        Self {
            id,
            parent,
            lineage: OnceLock::new(),
            next_child: AtomicU64::new(0),
            descriptors,
            guarded: Vec::new(),
            barrier: false,
            pending: AtomicUsize::new(1),
            children: AtomicUsize::new(1),
            state: AtomicU8::new(TaskState::Pending as u8),
            successors: Mutex::new(Some(Vec::new())),
            body: Mutex::new(body),
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Record the accesses the body will hold a lock for
    pub(crate) fn with_guards(mut self, guarded: Vec<ObjectDescriptor>) -> Self {
        self.guarded = guarded;
        self
    }

    /// Mark the node as a barrier; barriers are left out of the metrics
    pub(crate) fn as_barrier(mut self) -> Self {
        self.barrier = true;
        self
    }

    pub(crate) fn is_barrier(&self) -> bool {
        self.barrier
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn parent(&self) -> Option<&Arc<TaskNode>> {
        self.parent.as_ref()
    }

    pub(crate) fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    fn advance(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Find a lock held by this task or an ancestor that `wanted` conflicts with
    ///
    /// Ancestors are not predecessors of their subtasks, so a subtask binding
    /// such an access would block on a lock that is only released after the
    /// subtask itself completes.
    pub(crate) fn held_by_lineage(&self, wanted: &[ObjectDescriptor]) -> Option<(TaskId, ObjectId)> {
        let mut current = Some(self);
        while let Some(task) = current {
            for held in &task.guarded {
                if let Some(desc) = wanted.iter().find(|d| d.conflicts_with(held)) {
                    return Some((task.id, desc.object));
                }
            }
            current = task.parent.as_deref();
        }
        None
    }

    // ==================== Lineage ====================

    /// Fix the task's position in program order
    ///
    /// Called once, by the registry, while the task's objects are locked.
    pub(crate) fn assign_lineage(&self, root_seq: impl FnOnce() -> u64) -> &Lineage {
        self.lineage.get_or_init(|| match &self.parent {
            Some(parent) => {
                let seq = parent.next_child.fetch_add(1, Ordering::Relaxed);
                match parent.lineage() {
                    Some(lineage) => lineage.child(seq),
                    None => Lineage::root(root_seq()),
                }
            }
            None => Lineage::root(root_seq()),
        })
    }

    /// Position in program order, once registered
    pub(crate) fn lineage(&self) -> Option<&Lineage> {
        self.lineage.get()
    }

    // ==================== Predecessors ====================

    pub(crate) fn add_predecessor(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one pending predecessor; true when the task became ready
    pub(crate) fn resolve_predecessor(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
            && self.advance(TaskState::Pending, TaskState::Ready)
    }

    pub(crate) fn pending_predecessors(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Record `succ` as waiting on this task
    ///
    /// Returns false if this task already released its accesses.
    pub(crate) fn add_successor(&self, succ: &Arc<TaskNode>) -> bool {
        match self.successors.lock().as_mut() {
            Some(list) => {
                list.push(Arc::downgrade(succ));
                true
            }
            None => false,
        }
    }

    /// Close the successor list and return its contents
    pub(crate) fn close_successors(&self) -> Vec<Weak<TaskNode>> {
        self.successors.lock().take().unwrap_or_default()
    }

    // ==================== Execution ====================

    pub(crate) fn start_running(&self) -> bool {
        self.advance(TaskState::Ready, TaskState::Running)
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.body.lock().take()
    }

    pub(crate) fn add_child(&self) {
        self.children.fetch_add(1, Ordering::AcqRel);
    }

    /// Count one finished unit (the body or a subtask); true when all are done
    pub(crate) fn finish_one(&self) -> bool {
        let last = self.children.fetch_sub(1, Ordering::AcqRel) == 1;
        // Wake a body blocked in wait_for_subtasks
        let _done = self.done.lock();
        self.signal.notify_all();
        last
    }

    /// Subtasks not yet finished, excluding the body
    pub(crate) fn live_children(&self) -> usize {
        self.children.load(Ordering::Acquire).saturating_sub(1)
    }

    pub(crate) fn mark_done(&self) {
        self.state.store(TaskState::Done as u8, Ordering::Release);
        let mut done = self.done.lock();
        *done = true;
        self.signal.notify_all();
    }

    /// Park until the task changes or `timeout` elapses
    pub(crate) fn park(&self, timeout: Duration) {
        let mut done = self.done.lock();
        if !*done {
            self.signal.wait_for(&mut done, timeout);
        }
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("lineage", &self.lineage())
            .field("state", &self.state())
            .field("pending", &self.pending_predecessors())
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, parent: Option<Arc<TaskNode>>) -> Arc<TaskNode> {
        Arc::new(TaskNode::new(TaskId::new(id), parent, DescriptorSet::new(), None))
    }

    #[test]
    fn test_task_id() {
        let id = TaskId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(TaskId::from(42), id);
        assert_eq!(id.to_string(), "#42");
    }

    #[test]
    fn test_lineage_order() {
        let a = Lineage::root(1);
        let a0 = a.child(0);
        let a1 = a.child(1);
        let b = Lineage::root(2);

        assert!(a < a0);
        assert!(a0 < a1);
        assert!(a1 < b);
        assert!(a.is_ancestor_of(&a0));
        assert!(!a0.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(!a0.is_ancestor_of(&a1));
        assert_eq!(a1.child(3).to_string(), "1.1.3");
        assert_eq!(a1.depth(), 2);
    }

    #[test]
    fn test_held_by_lineage() {
        use crate::descriptor::{AccessMode, Region};

        let x = ObjectId::from_raw(1);
        let y = ObjectId::from_raw(2);
        let z = ObjectId::from_raw(3);
        let root = Arc::new(
            TaskNode::new(TaskId::new(1), None, DescriptorSet::new(), None)
                .with_guards(vec![ObjectDescriptor::whole(x, AccessMode::Write)]),
        );
        let mid = Arc::new(
            TaskNode::new(TaskId::new(2), Some(root.clone()), DescriptorSet::new(), None).with_guards(vec![
                ObjectDescriptor::whole(y, AccessMode::Read),
                ObjectDescriptor::region(z, Region::new(vec![0..4]), AccessMode::Write),
            ]),
        );

        let read_x = [ObjectDescriptor::whole(x, AccessMode::Read)];
        assert_eq!(mid.held_by_lineage(&read_x), Some((TaskId::new(1), x)));

        let read_y = [ObjectDescriptor::whole(y, AccessMode::Read)];
        assert_eq!(mid.held_by_lineage(&read_y), None);
        let write_y = [ObjectDescriptor::whole(y, AccessMode::Write)];
        assert_eq!(mid.held_by_lineage(&write_y), Some((TaskId::new(2), y)));

        let other_rows = [ObjectDescriptor::region(z, Region::new(vec![4..8]), AccessMode::Write)];
        assert_eq!(mid.held_by_lineage(&other_rows), None);
        assert_eq!(root.held_by_lineage(&write_y), None);
    }

    #[test]
    fn test_assign_lineage() {
        let parent = node(1, None);
        parent.assign_lineage(|| 7);
        assert_eq!(parent.lineage(), Some(&Lineage::root(7)));

        let first = node(2, Some(parent.clone()));
        let second = node(3, Some(parent.clone()));
        first.assign_lineage(|| unreachable!());
        second.assign_lineage(|| unreachable!());
        assert_eq!(first.lineage().unwrap().to_string(), "7.0");
        assert_eq!(second.lineage().unwrap().to_string(), "7.1");

        // Assignment happens once
        parent.assign_lineage(|| 99);
        assert_eq!(parent.lineage(), Some(&Lineage::root(7)));
    }

    #[test]
    fn test_predecessor_counting() {
        let task = node(1, None);
        task.add_predecessor();
        task.add_predecessor();

        // Registration guard plus two predecessors
        assert_eq!(task.pending_predecessors(), 3);
        assert!(!task.resolve_predecessor());
        assert!(!task.resolve_predecessor());
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.resolve_predecessor());
        assert_eq!(task.state(), TaskState::Ready);
    }

    #[test]
    fn test_successor_list_closes() {
        let pred = node(1, None);
        let succ = node(2, None);

        assert!(pred.add_successor(&succ));
        let list = pred.close_successors();
        assert_eq!(list.len(), 1);
        assert!(!pred.add_successor(&succ));
        assert!(pred.close_successors().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let task = node(1, None);
        assert!(!task.start_running());
        assert!(task.resolve_predecessor());
        assert!(task.start_running());
        assert_eq!(task.state(), TaskState::Running);

        task.mark_done();
        assert!(task.is_done());
        // Returns at once for a finished task
        task.park(Duration::from_secs(5));
    }

    #[test]
    fn test_children_counting() {
        let parent = node(1, None);
        parent.add_child();
        parent.add_child();
        assert_eq!(parent.live_children(), 2);

        // Body finishes first, then the two subtasks
        assert!(!parent.finish_one());
        assert!(!parent.finish_one());
        assert!(parent.finish_one());
    }

    #[test]
    fn test_outcome_conversion() {
        assert_eq!(().into_outcome(), Ok(()));
        assert_eq!(Ok::<(), &str>(()).into_outcome(), Ok(()));
        assert_eq!(Err::<(), _>("bad").into_outcome(), Err("bad".to_string()));
    }
}
