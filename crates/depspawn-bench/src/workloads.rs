//! Reference workloads
//!
//! Each workload spawns its tasks, waits, and checks the result against a
//! plain sequential computation.

use crate::cli::Workload;
use anyhow::{ensure, Result};
use depspawn::{RuntimeHandle, Shared, SharedArray, SpawnResult};
use serde::Serialize;
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, info};

/// Below this index fib is computed inline instead of spawning
const FIB_CUTOFF: u64 = 12;

/// Outcome of one workload run
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    /// Workload that ran
    pub workload: Workload,
    /// Problem size
    pub size: usize,
    /// Tasks spawned at the top level
    pub tasks: usize,
    /// Wall time from first spawn to the final wait, in milliseconds
    pub elapsed_ms: f64,
    /// Whether the result matched the sequential computation
    pub verified: bool,
}

/// Run a workload to completion
pub fn run(rt: &RuntimeHandle, workload: Workload, size: usize, blocks: usize) -> Result<WorkloadReport> {
    info!(?workload, size, blocks, threads = rt.num_threads(), "running workload");
    let start = Instant::now();
    let (tasks, verified) = match workload {
        Workload::Chain => chain(rt, size)?,
        Workload::Mxv => mxv(rt, size, blocks)?,
        Workload::Fib => fib(rt, size as u64)?,
    };
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
    info!(?workload, elapsed_ms, verified, "workload finished");
    Ok(WorkloadReport {
        workload,
        size,
        tasks,
        elapsed_ms,
        verified,
    })
}

/// Accumulator chain: writer `i` adds `i`, reader `i` records the running total
fn chain(rt: &RuntimeHandle, size: usize) -> Result<(usize, bool)> {
    let total = Shared::new(0u64);
    let seen = SharedArray::filled(&[size], 0u64);

    for i in 0..size {
        rt.spawn((total.write(), i as u64), |(mut total, i)| *total += i)?;
        rt.spawn(
            (total.read(), seen.block(i..i + 1).write(), i),
            |(total, mut seen, i)| seen[i] = *total,
        )?;
    }
    rt.wait()?;

    let mut expected = Vec::with_capacity(size);
    let mut running = 0u64;
    for i in 0..size as u64 {
        running += i;
        expected.push(running);
    }
    Ok((2 * size, seen.to_vec() == expected && *total.get() == running))
}

/// Split `0..n` into at most `blocks` contiguous ranges
pub fn row_blocks(n: usize, blocks: usize) -> Vec<Range<usize>> {
    let blocks = blocks.clamp(1, n.max(1));
    let step = n.div_ceil(blocks);
    (0..n).step_by(step.max(1)).map(|start| start..(start + step).min(n)).collect()
}

fn matrix_entry(i: usize, j: usize) -> f64 {
    ((i * 7 + j * 3) % 11) as f64 - 5.0
}

fn vector_entry(j: usize) -> f64 {
    (j % 5) as f64 + 1.0
}

/// Dense `y = A x` with one task per row block
fn mxv(rt: &RuntimeHandle, n: usize, blocks: usize) -> Result<(usize, bool)> {
    let a = SharedArray::from_fn(&[n, n], |ix| matrix_entry(ix[0], ix[1]));
    let x = SharedArray::from_fn(&[n], |ix| vector_entry(ix[0]));
    let y = SharedArray::filled(&[n], 0.0f64);

    let ranges = row_blocks(n, blocks);
    for rows in &ranges {
        debug!(?rows, "spawning row block");
        rt.spawn(
            (a.rows(rows.clone()).read(), x.read(), y.block(rows.clone()).write()),
            move |(a, x, mut y)| {
                let cols = a.shape()[1];
                for i in y.region().ranges()[0].clone() {
                    let mut sum = 0.0;
                    for j in 0..cols {
                        sum += a[[i, j]] * x[j];
                    }
                    y[i] = sum;
                }
            },
        )?;
    }
    rt.wait()?;

    let expected: Vec<f64> = (0..n)
        .map(|i| {
            let mut sum = 0.0;
            for j in 0..n {
                sum += matrix_entry(i, j) * vector_entry(j);
            }
            sum
        })
        .collect();
    Ok((ranges.len(), y.to_vec() == expected))
}

/// Iterative Fibonacci
pub fn fib_seq(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

fn spawn_fib(rt: &RuntimeHandle, n: u64, out: &Shared<u64>) -> SpawnResult<()> {
    let handle = rt.clone();
    rt.spawn((out.write(), n), move |(mut out, n)| -> Result<()> {
        if n < FIB_CUTOFF {
            *out = fib_seq(n);
            return Ok(());
        }
        let left = Shared::new(0u64);
        let right = Shared::new(0u64);
        spawn_fib(&handle, n - 1, &left)?;
        spawn_fib(&handle, n - 2, &right)?;
        handle.wait_for_subtasks()?;
        *out = left.get().wrapping_add(*right.get());
        Ok(())
    })?;
    Ok(())
}

/// Recursive Fibonacci where every call above the cutoff spawns two subtasks
fn fib(rt: &RuntimeHandle, n: u64) -> Result<(usize, bool)> {
    ensure!(n <= 90, "fib index {n} overflows u64");
    let out = Shared::new(0u64);
    spawn_fib(rt, n, &out)?;
    rt.wait()?;
    let value = *out.get();
    debug!(n, value, "fib computed");
    Ok((1, value == fib_seq(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depspawn::{Runtime, RuntimeConfig};

    fn runtime(config: RuntimeConfig) -> Runtime {
        Runtime::new(config).unwrap()
    }

    #[test]
    fn test_row_blocks() {
        assert_eq!(row_blocks(10, 3), vec![0..4, 4..8, 8..10]);
        assert_eq!(row_blocks(4, 8), vec![0..1, 1..2, 2..3, 3..4]);
        assert_eq!(row_blocks(5, 1), vec![0..5]);
        assert!(row_blocks(0, 4).is_empty());
    }

    #[test]
    fn test_fib_seq() {
        assert_eq!(fib_seq(0), 0);
        assert_eq!(fib_seq(1), 1);
        assert_eq!(fib_seq(10), 55);
        assert_eq!(fib_seq(20), 6765);
    }

    #[test]
    fn test_chain_parallel() {
        let rt = runtime(RuntimeConfig::new().with_threads(4));
        let report = run(&rt, Workload::Chain, 200, 1).unwrap();
        assert!(report.verified);
        assert_eq!(report.tasks, 400);
    }

    #[test]
    fn test_mxv_parallel_and_no_overlap() {
        let rt = runtime(RuntimeConfig::new().with_threads(4));
        assert!(run(&rt, Workload::Mxv, 64, 8).unwrap().verified);

        let rt = runtime(RuntimeConfig::new().with_threads(4).with_overlap_detection(false));
        assert!(run(&rt, Workload::Mxv, 64, 8).unwrap().verified);
    }

    #[test]
    fn test_fib_nested() {
        let rt = runtime(RuntimeConfig::new().with_threads(4));
        let report = run(&rt, Workload::Fib, 20, 1).unwrap();
        assert!(report.verified);
        assert!(rt.metrics().spawned > 1);
    }

    #[test]
    fn test_workloads_sequential() {
        let rt = runtime(RuntimeConfig::new().sequential());
        for (workload, size) in [(Workload::Chain, 50), (Workload::Mxv, 16), (Workload::Fib, 16)] {
            assert!(run(&rt, workload, size, 4).unwrap().verified, "{workload:?}");
        }
    }
}
