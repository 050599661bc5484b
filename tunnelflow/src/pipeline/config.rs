//! Pipeline configuration loaded from JSON.

use crate::errors::PipelineError;
use crate::executor::{PoolConfig, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Configuration for a pipeline and the pools its stages run on.
///
/// ```json
/// {
///   "name": "orders-cdc",
///   "helper": { "workers": 1 },
///   "executors": {
///     "apply": { "workers": 1, "queue_capacity": 256 },
///     "checkpoint": { "workers": 1 }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Helper pool configuration; defaults to one unbounded worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper: Option<PoolConfig>,
    /// Named executor pools for decorated stages.
    #[serde(default)]
    pub executors: BTreeMap<String, PoolConfig>,
}

impl PipelineConfig {
    /// Creates a configuration with default helper and no executors.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            helper: None,
            executors: BTreeMap::new(),
        }
    }

    /// Sets the helper pool configuration.
    #[must_use]
    pub fn with_helper(mut self, helper: PoolConfig) -> Self {
        self.helper = Some(helper);
        self
    }

    /// Adds a named executor.
    #[must_use]
    pub fn with_executor(mut self, key: impl Into<String>, config: PoolConfig) -> Self {
        self.executors.insert(key.into(), config);
        self
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Returns the helper pool configuration, named after the pipeline.
    #[must_use]
    pub fn helper_config(&self) -> PoolConfig {
        let name = format!("{}-helper", self.name);
        match &self.helper {
            Some(helper) => PoolConfig {
                name,
                ..helper.clone()
            },
            None => PoolConfig::new(name),
        }
    }

    /// Returns the configuration of executor `key`, named after its key.
    pub fn executor_config(&self, key: &str) -> Result<PoolConfig, PipelineError> {
        let config = self.executors.get(key).ok_or_else(|| {
            PipelineError::Config(format!(
                "pipeline '{}' has no executor named '{key}'",
                self.name
            ))
        })?;
        Ok(PoolConfig {
            name: key.to_string(),
            ..config.clone()
        })
    }

    /// Starts executor `key` on the current runtime.
    pub fn build_executor(&self, key: &str) -> Result<Arc<WorkerPool>, PipelineError> {
        WorkerPool::new(self.executor_config(key)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config(
                "pipeline name must not be empty".to_string(),
            ));
        }
        self.helper_config().validate()?;
        for key in self.executors.keys() {
            self.executor_config(key)?.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "name": "orders-cdc",
        "executors": {
            "apply": { "workers": 1, "queue_capacity": 256 },
            "checkpoint": {}
        }
    }"#;

    #[test]
    fn test_from_json_str() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();

        assert_eq!(config.name, "orders-cdc");
        assert_eq!(config.helper_config(), PoolConfig::new("orders-cdc-helper"));
        assert_eq!(
            config.executor_config("apply").unwrap(),
            PoolConfig::new("apply").with_queue_capacity(256)
        );
        assert_eq!(
            config.executor_config("checkpoint").unwrap(),
            PoolConfig::new("checkpoint")
        );
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.executors.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_invalid_executor_is_rejected() {
        let json = r#"{"name": "p", "executors": {"apply": {"workers": 0}}}"#;
        let err = PipelineConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("'apply'"));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = PipelineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_unknown_executor() {
        let config = PipelineConfig::new("p").with_executor("apply", PoolConfig::default());
        let err = config.executor_config("fetch").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
