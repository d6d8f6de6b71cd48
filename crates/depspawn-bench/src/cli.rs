//! CLI argument parsing for depspawn-bench

use clap::{Parser, ValueEnum};
use depspawn::{ConfigError, RuntimeConfig};
use serde::Serialize;

/// Reference workload to run
#[derive(ValueEnum, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    /// Accumulator updated by a chain of writers, sampled by readers
    Chain,
    /// Dense matrix-vector product split into row blocks
    Mxv,
    /// Recursive Fibonacci with nested spawns
    Fib,
}

impl Workload {
    /// Problem size used when `--size` is not given
    pub fn default_size(self) -> usize {
        match self {
            Workload::Chain => 1000,
            Workload::Mxv => 512,
            Workload::Fib => 25,
        }
    }
}

/// Run reference workloads on the depspawn engine
#[derive(Parser, Debug, Clone)]
#[command(name = "depspawn-bench")]
#[command(about = "Run reference workloads on the depspawn engine")]
#[command(version)]
pub struct Cli {
    /// Workload to run
    #[arg(long, value_enum, default_value_t = Workload::Chain)]
    pub workload: Workload,

    /// Worker threads (defaults to DEPSPAWN_NUM_THREADS or all hardware threads)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Problem size (chain length, matrix order or Fibonacci index)
    #[arg(long)]
    pub size: Option<usize>,

    /// Number of row blocks for mxv
    #[arg(long, default_value = "8")]
    pub blocks: usize,

    /// Run every task on the main thread
    #[arg(long)]
    pub sequential: bool,

    /// Treat every array access as covering the whole array
    #[arg(long)]
    pub no_overlap: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print a JSON report including the runtime metrics
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Effective problem size
    pub fn size(&self) -> usize {
        self.size.unwrap_or_else(|| self.workload.default_size())
    }

    /// Runtime configuration from the environment, overridden by flags
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        let mut config = RuntimeConfig::from_env()?;
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        if self.sequential {
            config = config.sequential();
        }
        if self.no_overlap {
            config = config.with_overlap_detection(false);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depspawn::ExecutionMode;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["depspawn-bench"]);
        assert_eq!(cli.workload, Workload::Chain);
        assert_eq!(cli.size(), 1000);
        assert_eq!(cli.blocks, 8);
        assert!(cli.threads.is_none());
        assert!(!cli.sequential);
        assert!(!cli.no_overlap);
        assert_eq!(cli.log_level, "info");
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_custom_values() {
        let cli = Cli::parse_from([
            "depspawn-bench",
            "--workload", "mxv",
            "--threads", "3",
            "--size", "64",
            "--blocks", "4",
            "--sequential",
            "--no-overlap",
            "--log-level", "debug",
            "--json",
        ]);
        assert_eq!(cli.workload, Workload::Mxv);
        assert_eq!(cli.threads, Some(3));
        assert_eq!(cli.size(), 64);
        assert_eq!(cli.blocks, 4);
        assert!(cli.json);

        let config = cli.runtime_config().unwrap();
        assert_eq!(config.num_threads, Some(3));
        assert_eq!(config.mode, ExecutionMode::Sequential);
        assert!(!config.overlap_detection);
    }

    #[test]
    fn test_workload_default_sizes() {
        let cli = Cli::parse_from(["depspawn-bench", "--workload", "fib"]);
        assert_eq!(cli.size(), 25);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let cli = Cli::parse_from(["depspawn-bench", "--threads", "0"]);
        assert!(cli.runtime_config().is_err());
    }
}
