//! Per-thread record of the task whose body is executing, and of the
//! observers open on this thread

use crate::task::{TaskId, TaskNode};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FRAME: AtomicU64 = AtomicU64::new(1);

/// Tasks spawned from one context while an observer is open
struct Frame {
    id: u64,
    runtime: u64,
    owner: Option<TaskId>,
    spawned: Vec<Arc<TaskNode>>,
}

thread_local! {
    static CURRENT: RefCell<Option<(u64, Arc<TaskNode>)>> = const { RefCell::new(None) };
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Task currently executing on this thread for the given runtime
pub(crate) fn current_task(runtime: u64) -> Option<Arc<TaskNode>> {
    CURRENT.with(|current| match &*current.borrow() {
        Some((owner, task)) if *owner == runtime => Some(Arc::clone(task)),
        _ => None,
    })
}

/// Restores the previous task on drop
///
/// Bodies can nest on one thread when a waiting task helps run queued work.
pub(crate) struct TaskScope {
    previous: Option<(u64, Arc<TaskNode>)>,
}

/// Mark `task` as executing on this thread
pub(crate) fn enter(runtime: u64, task: Arc<TaskNode>) -> TaskScope {
    let previous = CURRENT.with(|current| current.borrow_mut().replace((runtime, task)));
    TaskScope { previous }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

// ==================== Observer frames ====================

/// Start recording spawns made by `owner` on this thread
pub(crate) fn open_frame(runtime: u64, owner: Option<TaskId>) -> u64 {
    let id = NEXT_FRAME.fetch_add(1, Ordering::Relaxed);
    FRAMES.with(|frames| {
        frames.borrow_mut().push(Frame {
            id,
            runtime,
            owner,
            spawned: Vec::new(),
        })
    });
    id
}

/// Add `node` to every open frame of its spawning context
pub(crate) fn record_spawn(runtime: u64, owner: Option<TaskId>, node: &Arc<TaskNode>) {
    FRAMES.with(|frames| {
        for frame in frames.borrow_mut().iter_mut() {
            if frame.runtime == runtime && frame.owner == owner {
                frame.spawned.push(Arc::clone(node));
            }
        }
    });
}

/// Number of spawns recorded by a frame
pub(crate) fn frame_len(id: u64) -> usize {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .find(|f| f.id == id)
            .map_or(0, |f| f.spawned.len())
    })
}

/// Stop recording and return what the frame saw
pub(crate) fn close_frame(id: u64) -> Vec<Arc<TaskNode>> {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        match frames.iter().rposition(|f| f.id == id) {
            Some(pos) => frames.remove(pos).spawned,
            None => Vec::new(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorSet;
    use crate::task::TaskId;

    fn node(id: u64) -> Arc<TaskNode> {
        Arc::new(TaskNode::new(TaskId::new(id), None, DescriptorSet::new(), None))
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        assert!(current_task(1).is_none());

        let outer = enter(1, node(10));
        assert_eq!(current_task(1).map(|t| t.id()), Some(TaskId::new(10)));

        {
            let _inner = enter(1, node(11));
            assert_eq!(current_task(1).map(|t| t.id()), Some(TaskId::new(11)));
        }
        assert_eq!(current_task(1).map(|t| t.id()), Some(TaskId::new(10)));

        drop(outer);
        assert!(current_task(1).is_none());
    }

    #[test]
    fn test_other_runtime_is_invisible() {
        let _scope = enter(1, node(10));
        assert!(current_task(2).is_none());
    }

    #[test]
    fn test_frames_record_matching_owner() {
        let outer = open_frame(1, None);
        record_spawn(1, None, &node(20));
        let inner = open_frame(1, None);
        record_spawn(1, None, &node(21));
        // Spawns of another task or runtime are not this context's
        record_spawn(1, Some(TaskId::new(5)), &node(22));
        record_spawn(2, None, &node(23));

        assert_eq!(frame_len(inner), 1);
        let seen: Vec<_> = close_frame(inner).iter().map(|t| t.id()).collect();
        assert_eq!(seen, vec![TaskId::new(21)]);

        assert_eq!(frame_len(outer), 2);
        assert_eq!(close_frame(outer).len(), 2);
        assert!(close_frame(outer).is_empty());
        assert_eq!(frame_len(outer), 0);
    }
}
