//! Worker pool configuration.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};

/// Configuration for a [`WorkerPool`](super::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name, used in logs and rejection errors.
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue capacity; `None` means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_name() -> String {
    "executor".to_string()
}

fn default_workers() -> usize {
    1
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            workers: default_workers(),
            queue_capacity: None,
        }
    }
}

impl PoolConfig {
    /// Creates a single-worker, unbounded pool configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Bounds the queue.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Makes the queue unbounded.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.queue_capacity = None;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("pool name must not be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config(format!(
                "pool '{}' must have at least one worker",
                self.name
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::Config(format!(
                "pool '{}' queue capacity must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.workers, 1);
        assert!(config.queue_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new("apply")
            .with_workers(4)
            .with_queue_capacity(128);

        assert_eq!(config.name, "apply");
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, Some(128));
        assert!(config.unbounded().queue_capacity.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = PoolConfig::new("x").with_workers(0).validate().unwrap_err();
        assert!(err.to_string().contains("at least one worker"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = PoolConfig::new("x").with_queue_capacity(0).validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"name": "fetch"}"#).unwrap();
        assert_eq!(config, PoolConfig::new("fetch"));
    }
}
