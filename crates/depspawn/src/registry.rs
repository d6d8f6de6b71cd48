//! Dependency registry: in-flight accesses per object
//!
//! For every tracked object the registry keeps the accesses of tasks that have
//! been spawned but not yet completed. A new task scans the entries of its
//! objects, becomes a successor of every earlier task it conflicts with, then
//! appends its own accesses.
//!
//! Locking rules:
//! - a registration locks all its entries in ascending `ObjectId` order and
//!   holds them until its own accesses are appended
//! - a release locks one entry at a time
//! - the map itself is never touched while an entry is locked, except by the
//!   non-blocking removal of an empty entry

use crate::descriptor::{AccessMode, Extent, ObjectId};
use crate::task::TaskNode;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Type of dependency between an earlier and a later access
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    /// Later task reads what the earlier one writes
    ReadAfterWrite,
    /// Both tasks write
    WriteAfterWrite,
    /// Later task writes what the earlier one reads
    WriteAfterRead,
}

impl DependencyKind {
    /// Classify a pair of modes, earlier first; `None` if they commute
    pub fn between(earlier: AccessMode, later: AccessMode) -> Option<Self> {
        match (earlier, later) {
            (AccessMode::Write, AccessMode::Read) => Some(Self::ReadAfterWrite),
            (AccessMode::Write, AccessMode::Write) => Some(Self::WriteAfterWrite),
            (AccessMode::Read, AccessMode::Write) => Some(Self::WriteAfterRead),
            _ => None,
        }
    }
}

/// Access of one in-flight task to one object
struct ActiveAccess {
    task: Arc<TaskNode>,
    extent: Extent,
    mode: AccessMode,
}

#[derive(Default)]
struct ObjectEntry {
    accesses: Vec<ActiveAccess>,
}

/// Registry of in-flight accesses
pub(crate) struct DependencyRegistry {
    entries: DashMap<ObjectId, Arc<Mutex<ObjectEntry>>>,
    next_root: AtomicU64,
}

impl DependencyRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_root: AtomicU64::new(0),
        }
    }

    /// Register a task and link it after every conflicting earlier task
    ///
    /// Assigns the task's lineage and returns the number of predecessors.
    /// Every predecessor holds one count on the task's pending counter; the
    /// caller still owns the registration guard.
    pub(crate) fn register(&self, node: &Arc<TaskNode>) -> usize {
        let objects = node.descriptors().objects();
        let handles: Vec<Arc<Mutex<ObjectEntry>>> = objects
            .iter()
            .map(|object| Arc::clone(self.entries.entry(*object).or_default().value()))
            .collect();
        // Ascending ObjectId order
        let mut guards: Vec<MutexGuard<'_, ObjectEntry>> =
            handles.iter().map(|handle| handle.lock()).collect();

        let lineage = node.assign_lineage(|| self.next_root.fetch_add(1, Ordering::Relaxed));

        let mut predecessors: Vec<Arc<TaskNode>> = Vec::new();
        for (object, entry) in objects.iter().zip(guards.iter()) {
            for access in &entry.accesses {
                if predecessors.iter().any(|p| p.id() == access.task.id()) {
                    continue;
                }
                // Ancestors and logically later tasks never precede this one
                let earlier = match access.task.lineage() {
                    Some(other) => other < lineage && !other.is_ancestor_of(lineage),
                    None => false,
                };
                if !earlier {
                    continue;
                }
                let kind = node
                    .descriptors()
                    .for_object(*object)
                    .filter(|d| d.extent.overlaps(&access.extent))
                    .find_map(|d| DependencyKind::between(access.mode, d.mode));
                if let Some(kind) = kind {
                    trace!(
                        task = %node.id(),
                        %lineage,
                        predecessor = %access.task.id(),
                        %object,
                        ?kind,
                        "dependency"
                    );
                    predecessors.push(Arc::clone(&access.task));
                }
            }
        }

        let mut linked = 0;
        for pred in &predecessors {
            node.add_predecessor();
            if pred.add_successor(node) {
                linked += 1;
            } else {
                // Already released; the registration guard keeps this above zero
                node.resolve_predecessor();
            }
        }

        for (object, entry) in objects.iter().zip(guards.iter_mut()) {
            for desc in node.descriptors().for_object(*object) {
                entry.accesses.push(ActiveAccess {
                    task: Arc::clone(node),
                    extent: desc.extent.clone(),
                    mode: desc.mode,
                });
            }
        }
        drop(guards);

        linked
    }

    /// Remove a finished task's accesses and resolve its successors
    ///
    /// Returns the successors that became ready.
    pub(crate) fn release(&self, node: &TaskNode) -> Vec<Arc<TaskNode>> {
        for object in node.descriptors().objects() {
            let handle = match self.entries.get(&object) {
                Some(entry) => Arc::clone(entry.value()),
                None => {
                    warn!(task = %node.id(), %object, "released object has no registry entry");
                    continue;
                }
            };
            let now_empty = {
                let mut entry = handle.lock();
                entry.accesses.retain(|a| a.task.id() != node.id());
                entry.accesses.is_empty()
            };
            drop(handle);
            if now_empty {
                self.entries.remove_if(&object, |_, entry| {
                    Arc::strong_count(entry) == 1
                        && entry
                            .try_lock()
                            .map(|e| e.accesses.is_empty())
                            .unwrap_or(false)
                });
            }
        }

        let mut ready = Vec::new();
        for succ in node.close_successors() {
            if let Some(succ) = succ.upgrade() {
                if succ.resolve_predecessor() {
                    ready.push(succ);
                }
            }
        }
        ready
    }

    /// Number of objects with in-flight accesses
    pub(crate) fn tracked_objects(&self) -> usize {
        self.entries.len()
    }

    /// Number of in-flight accesses across all objects
    pub(crate) fn active_accesses(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.value().lock().accesses.len())
            .sum()
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
