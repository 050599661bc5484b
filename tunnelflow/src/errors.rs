//! Error types for the tunnelflow framework.
//!
//! Two layers of failure exist:
//!
//! - [`StageError`] is the per-input (or per-lifecycle-call) failure signal a
//!   stage raises. It never interrupts the driver; the chain logs and reports it.
//! - [`PipelineError`] covers misuse of the framework itself (double init,
//!   relinking, rejected submissions) and aggregated shutdown failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed error used as the source of a [`StageError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for results returned by framework operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `init` was called on a pipeline whose chain is already wired.
    #[error("Pipeline '{0}' is already initialized")]
    AlreadyInitialized(String),

    /// An operation needed the chain to be wired first.
    #[error("Pipeline '{0}' has not been initialized")]
    NotInitialized(String),

    /// A stage already has a successor.
    #[error("Stage '{0}' is already linked to a next stage")]
    AlreadyLinked(String),

    /// A worker pool refused a task.
    #[error("Executor '{pool}' rejected task: {reason}")]
    Rejected {
        /// The pool name.
        pool: String,
        /// Why the task was refused.
        reason: RejectReason,
    },

    /// A worker pool was created outside of a Tokio runtime.
    #[error("No Tokio runtime available to start executor '{0}'")]
    NoRuntime(String),

    /// The background initialization task was dropped before it finished.
    #[error("Initialization of pipeline '{0}' was aborted before completion")]
    InitAborted(String),

    /// One or more stages failed to shut down.
    #[error("{} stage(s) failed to shut down: {}", .0.len(), join_messages(.0))]
    Shutdown(Vec<StageError>),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The tracing subscriber could not be installed.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// A stage error surfaced through a pipeline operation.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_messages(errors: &[StageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a worker pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The pool no longer accepts tasks.
    ShutDown,
    /// The bounded queue is at capacity.
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => f.write_str("executor is shut down"),
            Self::QueueFull => f.write_str("queue is full"),
        }
    }
}

/// The lifecycle phase in which a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Failure during `init`.
    Init,
    /// Failure while processing a single input.
    Process,
    /// Failure while releasing resources.
    Shutdown,
    /// The stage's executor refused the input.
    Rejected,
    /// The stage panicked.
    Panicked,
}

impl StageErrorKind {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Process => "process",
            Self::Shutdown => "shutdown",
            Self::Rejected => "rejected",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure signal raised by a stage.
///
/// A stage usually leaves `stage` empty; the node that drives it fills in its
/// name before the error is logged or reported.
#[derive(Debug, Error)]
#[error("Stage '{stage}' {kind} error: {message}")]
pub struct StageError {
    /// The stage name.
    pub stage: String,
    /// The lifecycle phase.
    pub kind: StageErrorKind,
    /// Human-readable description.
    pub message: String,
    /// The offending input, rendered for diagnostics.
    pub input: Option<String>,
    /// The underlying cause.
    #[source]
    pub source: Option<BoxError>,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: String::new(),
            kind,
            message: message.into(),
            input: None,
            source: None,
        }
    }

    /// Creates an initialization error.
    #[must_use]
    pub fn init(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Init, message)
    }

    /// Creates a processing error.
    #[must_use]
    pub fn process(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Process, message)
    }

    /// Creates a shutdown error.
    #[must_use]
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Shutdown, message)
    }

    /// Sets the stage name if it has not been set yet.
    #[must_use]
    pub fn in_stage(mut self, stage: &str) -> Self {
        if self.stage.is_empty() {
            self.stage = stage.to_string();
        }
        self
    }

    /// Attaches the offending input.
    #[must_use]
    pub fn with_input(mut self, input: impl fmt::Debug) -> Self {
        self.input = Some(format!("{input:?}"));
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the chain of source messages, outermost first.
    #[must_use]
    pub fn source_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}
