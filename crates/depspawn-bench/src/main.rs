//! depspawn benchmark binary
//!
//! Runs one reference workload on a runtime configured from the environment
//! and the command line, then checks the result.

mod cli;
mod workloads;

use anyhow::{bail, Result};
use cli::Cli;
use depspawn::{MetricsSnapshot, Runtime, RuntimeConfig};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workloads::WorkloadReport;

/// Full report printed with `--json`
#[derive(Serialize)]
struct BenchReport<'a> {
    config: &'a RuntimeConfig,
    threads: usize,
    #[serde(flatten)]
    workload: &'a WorkloadReport,
    metrics: MetricsSnapshot,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = cli.runtime_config()?;
    let rt = Runtime::new(config)?;

    let report = workloads::run(&rt, cli.workload, cli.size(), cli.blocks)?;
    let metrics = rt.metrics();
    tracing::info!(
        spawned = metrics.spawned,
        deferred = metrics.deferred,
        edges = metrics.dependency_edges,
        failed = metrics.failed,
        "runtime metrics"
    );

    if cli.json {
        let full = BenchReport {
            config: rt.config(),
            threads: rt.num_threads(),
            workload: &report,
            metrics,
        };
        println!("{}", serde_json::to_string_pretty(&full)?);
    } else {
        println!(
            "{:?} size={} threads={} tasks={} elapsed={:.3}ms verified={}",
            report.workload,
            report.size,
            rt.num_threads(),
            report.tasks,
            report.elapsed_ms,
            report.verified
        );
    }

    if !report.verified {
        bail!("{:?} result does not match the sequential computation", report.workload);
    }

    rt.shutdown()?;
    Ok(())
}
