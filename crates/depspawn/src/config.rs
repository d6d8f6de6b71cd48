//! Runtime configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the worker count
pub const ENV_NUM_THREADS: &str = "DEPSPAWN_NUM_THREADS";
/// Environment variable toggling sub-block overlap detection
pub const ENV_OVERLAP_DETECTION: &str = "DEPSPAWN_OVERLAP_DETECTION";
/// Environment variable selecting sequential execution
pub const ENV_SEQUENTIAL: &str = "DEPSPAWN_SEQUENTIAL";

/// How ready tasks are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// On a pool of worker threads
    #[default]
    Parallel,
    /// On the spawning thread, in dependency order
    Sequential,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads; `None` uses every hardware thread
    #[serde(default)]
    pub num_threads: Option<usize>,
    /// Track array sub-blocks; when off, every array access covers the whole array
    #[serde(default = "default_overlap_detection")]
    pub overlap_detection: bool,
    /// Execution mode
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Worker thread name prefix
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_overlap_detection() -> bool {
    true
}

fn default_thread_name() -> String {
    "depspawn-worker".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            overlap_detection: default_overlap_detection(),
            mode: ExecutionMode::default(),
            thread_name: default_thread_name(),
        }
    }
}

impl RuntimeConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Enable or disable sub-block overlap detection
    pub fn with_overlap_detection(mut self, enabled: bool) -> Self {
        self.overlap_detection = enabled;
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run every task on the spawning thread
    pub fn sequential(self) -> Self {
        self.with_mode(ExecutionMode::Sequential)
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Default configuration overridden by the `DEPSPAWN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Default configuration overridden by values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_NUM_THREADS) {
            let n = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_NUM_THREADS,
                    value: value.clone(),
                })?;
            config.num_threads = Some(n);
        }

        if let Some(value) = lookup(ENV_OVERLAP_DETECTION) {
            config.overlap_detection = parse_flag(&value).ok_or(ConfigError::InvalidEnv {
                var: ENV_OVERLAP_DETECTION,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_SEQUENTIAL) {
            let sequential = value.is_empty() || parse_flag(&value).unwrap_or(true);
            if sequential {
                config.mode = ExecutionMode::Sequential;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == Some(0) {
            return Err(ConfigError::InvalidThreadCount(0));
        }
        Ok(())
    }

    /// Worker count after applying the hardware default
    pub fn effective_threads(&self) -> usize {
        match self.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.num_threads.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            }),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.num_threads, None);
        assert!(config.overlap_detection);
        assert_eq!(config.mode, ExecutionMode::Parallel);
        assert_eq!(config.thread_name, "depspawn-worker");
        assert!(config.effective_threads() >= 1);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_threads(4)
            .with_overlap_detection(false)
            .with_thread_name("pool");
        assert_eq!(config.effective_threads(), 4);
        assert!(!config.overlap_detection);
        assert_eq!(config.thread_name, "pool");

        let seq = config.sequential();
        assert_eq!(seq.mode, ExecutionMode::Sequential);
        assert_eq!(seq.effective_threads(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let err = RuntimeConfig::new().with_threads(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreadCount(0)));
    }

    #[test]
    fn test_from_lookup() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_NUM_THREADS, "6"),
            (ENV_OVERLAP_DETECTION, "false"),
        ]))
        .unwrap();
        assert_eq!(config.num_threads, Some(6));
        assert!(!config.overlap_detection);
        assert_eq!(config.mode, ExecutionMode::Parallel);

        let config = RuntimeConfig::from_lookup(lookup(&[(ENV_SEQUENTIAL, "")])).unwrap();
        assert_eq!(config.mode, ExecutionMode::Sequential);

        let config = RuntimeConfig::from_lookup(lookup(&[(ENV_SEQUENTIAL, "0")])).unwrap();
        assert_eq!(config.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_NUM_THREADS, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_NUM_THREADS, .. }));

        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_NUM_THREADS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreadCount(0)));

        let err =
            RuntimeConfig::from_lookup(lookup(&[(ENV_OVERLAP_DETECTION, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_serde_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"num_threads": 2}"#).unwrap();
        assert_eq!(config.num_threads, Some(2));
        assert!(config.overlap_detection);
        assert_eq!(config.thread_name, "depspawn-worker");

        let json = serde_json::to_string(&RuntimeConfig::new().sequential()).unwrap();
        assert!(json.contains("\"sequential\""));
    }
}
