//! Serializable record of a stage failure.

use crate::errors::{StageError, StageErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stage failure as delivered to error reporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Stage name.
    pub stage: String,
    /// Lifecycle phase that failed.
    pub kind: StageErrorKind,
    /// Error message.
    pub message: String,
    /// The offending input, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl StageFailure {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            input: None,
            causes: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Attaches the offending input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<&StageError> for StageFailure {
    fn from(err: &StageError) -> Self {
        Self {
            stage: err.stage.clone(),
            kind: err.kind,
            message: err.message.clone(),
            input: err.input.clone(),
            causes: err.source_chain(),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_stage_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err = StageError::process("fetch failed")
            .in_stage("fetch")
            .with_input("cursor-9")
            .with_source(io);

        let failure = StageFailure::from(&err);
        assert_eq!(failure.stage, "fetch");
        assert_eq!(failure.kind, StageErrorKind::Process);
        assert_eq!(failure.input.as_deref(), Some("\"cursor-9\""));
        assert_eq!(failure.causes, vec!["read timed out".to_string()]);
    }

    #[test]
    fn test_to_json() {
        let failure = StageFailure::new("apply", StageErrorKind::Rejected, "queue is full");
        let json = failure.to_json();

        assert_eq!(json["stage"], "apply");
        assert_eq!(json["kind"], "rejected");
        assert!(json.get("input").is_none());
        assert!(json.get("causes").is_none());
    }
}
