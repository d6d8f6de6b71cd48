//! # depspawn
//!
//! Data-dependent task spawning.
//!
//! Ordinary functions are spawned together with their arguments. The way
//! each argument is passed (by value, for reading, or for writing) tells the
//! runtime which earlier tasks the call must wait for; everything else runs
//! in parallel on a work-stealing pool.
//!
//! Features:
//! - Access classification from argument wrapper types
//! - Sub-block tracking for N-dimensional arrays
//! - Nested spawns with `wait_for_subtasks`
//! - Targeted barriers with `wait_for`
//! - Scoped barriers with [`Observer`] and `sync`
//! - Sequential execution mode for debugging
//!
//! ```
//! use depspawn::{Runtime, RuntimeConfig, SharedArray};
//!
//! let rt = Runtime::new(RuntimeConfig::new().with_threads(2))?;
//! let v = SharedArray::filled(&[100], 0u32);
//!
//! // The two halves are written concurrently
//! rt.spawn(v.block(0..50).write(), |mut low| low.fill(1))?;
//! rt.spawn(v.block(50..100).write(), |mut high| high.fill(2))?;
//!
//! // Waits for both writers
//! rt.spawn(v.read(), |all| assert_eq!(all.iter().sum::<u32>(), 150))?;
//! rt.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
mod adapter;
pub mod array;
pub mod config;
mod context;
pub mod descriptor;
pub mod error;
pub mod executor;
mod registry;
mod runtime;
pub mod shared;
mod task;

pub use access::{classify, ignore, Classifier, Ignore, TaskArg, Val};
pub use array::{
    ArrayBlock, ArrayClaim, ArrayError, ArrayRead, ArrayView, ArrayViewMut, ArrayWrite,
    SharedArray,
};
pub use config::{ExecutionMode, RuntimeConfig};
pub use descriptor::{AccessMode, DescriptorSet, Extent, ObjectDescriptor, ObjectId, Region};
pub use error::{
    ConfigError, SpawnError, SpawnResult, TaskFailure, WaitError, WaitResult,
};
pub use executor::{Executor, InlineExecutor, Job, RayonExecutor};
pub use registry::DependencyKind;
pub use runtime::{Observer, Runtime, RuntimeHandle, TaskHandle};
pub use shared::{Claim, Read, ReadGuard, Shared, Write, WriteGuard};
pub use task::{TaskId, TaskOutcome, TaskState};

pub use depspawn_metrics::MetricsSnapshot;
