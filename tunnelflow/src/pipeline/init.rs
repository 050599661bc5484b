//! Background initialization of a pipeline's stages.

use crate::context::PipelineContext;
use crate::errors::{StageError, StageErrorKind};
use crate::events::StageFailure;
use crate::executor::panic_message;
use crate::observability::SpanTimer;
use crate::stages::Lifecycle;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of a pipeline's background initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Pipeline name.
    pub pipeline: String,
    /// Stages whose `init` returned successfully, in order.
    pub initialized: Vec<String>,
    /// Stages whose `init` failed or panicked, in order.
    pub failures: Vec<StageFailure>,
    /// Wall time spent initializing.
    pub duration_ms: u64,
}

impl InitReport {
    /// Returns true if no stage failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the stages that failed, in order.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<&str> {
        self.failures
            .iter()
            .map(|failure| failure.stage.as_str())
            .collect()
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Calls `init` on every stage in order.
///
/// A stage that fails or panics is logged, reported through the context and
/// recorded; later stages still initialize.
pub(crate) async fn init_stages(
    pipeline: String,
    stages: Vec<Arc<dyn Lifecycle>>,
    ctx: Arc<PipelineContext>,
) -> InitReport {
    let timer = SpanTimer::start(format!("{pipeline}.init"));
    let mut initialized = Vec::with_capacity(stages.len());
    let mut failures = Vec::new();

    for stage in &stages {
        let name = stage.name();
        let err = match AssertUnwindSafe(stage.init(ctx.clone())).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(pipeline = %pipeline, stage = name, "Stage initialized");
                initialized.push(name.to_string());
                continue;
            }
            Ok(Err(err)) => err.in_stage(name),
            Err(payload) => {
                StageError::new(StageErrorKind::Panicked, panic_message(payload.as_ref()))
                    .in_stage(name)
            }
        };

        error!(
            pipeline = %pipeline,
            stage = %err.stage,
            kind = %err.kind,
            "Stage failed to initialize: {}", err.message
        );
        let failure = StageFailure::from(&err);
        ctx.report(failure.clone());
        failures.push(failure);
    }

    let report = InitReport {
        pipeline,
        initialized,
        failures,
        duration_ms: timer.elapsed_ms(),
    };
    info!(
        pipeline = %report.pipeline,
        initialized = report.initialized.len(),
        failed = report.failures.len(),
        duration_ms = report.duration_ms,
        "Pipeline initialization finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingErrorReporter;
    use crate::stages::StageNode;
    use crate::testing::RecordingStage;

    #[tokio::test]
    async fn test_init_stages_records_failures_and_continues() {
        let reporter = Arc::new(CollectingErrorReporter::new());
        let ctx = PipelineContext::builder()
            .error_reporter(reporter.clone())
            .build();

        let third = RecordingStage::<u8>::new("c");
        let third_probe = third.probe();
        let stages: Vec<Arc<dyn Lifecycle>> = vec![
            Arc::new(StageNode::new(RecordingStage::<u8>::new("a").failing_init())),
            Arc::new(StageNode::new(RecordingStage::<u8>::new("b").panicking_init())),
            Arc::new(StageNode::new(third)),
        ];

        let report = init_stages("p".to_string(), stages, ctx).await;

        assert_eq!(report.initialized, vec!["c".to_string()]);
        assert_eq!(report.failed_stages(), vec!["a", "b"]);
        assert_eq!(report.failures[0].kind, StageErrorKind::Init);
        assert_eq!(report.failures[1].kind, StageErrorKind::Panicked);
        assert_eq!(report.failures[1].message, "init exploded");
        assert!(!report.is_complete());
        assert_eq!(third_probe.init_completed(), 1);
        assert_eq!(reporter.len(), 2);
    }

    #[test]
    fn test_report_serializes() {
        let report = InitReport {
            pipeline: "p".to_string(),
            initialized: vec!["a".to_string()],
            failures: Vec::new(),
            duration_ms: 3,
        };

        let json = report.to_json();
        assert_eq!(json["pipeline"], "p");
        assert_eq!(json["initialized"][0], "a");
        assert!(report.is_complete());
    }
}
