//! Runs a node's `process` on a dedicated worker pool.

use super::WorkerPool;
use crate::context::PipelineContext;
use crate::errors::{PipelineError, StageError, StageErrorKind};
use crate::events::{ErrorReporter, StageFailure};
use crate::stages::{Inlet, Lifecycle, Node};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Wraps a node so each `process` call becomes a task on its own pool.
///
/// A pipeline with N decorated stages has N independent concurrency domains:
/// a stalled stage backs up only its own queue. Submission is fire-and-forget;
/// the outcome of the wrapped `process` never returns to the caller. A refused
/// submission is logged and reported as a [`StageErrorKind::Rejected`] failure.
///
/// `init`, `shutdown` and `set_next_stage` delegate to the wrapped node. The
/// pool is never shut down by the decorator.
pub struct ExecutionDecorator<I: Send + 'static, O: Send + 'static> {
    inner: Arc<dyn Node<I, O>>,
    executor: Arc<WorkerPool>,
    reporter: OnceLock<Arc<dyn ErrorReporter>>,
}

impl<I: Send + 'static, O: Send + 'static> ExecutionDecorator<I, O> {
    /// Wraps `node`, binding it to `executor`.
    pub fn new<N>(node: N, executor: Arc<WorkerPool>) -> Self
    where
        N: Node<I, O> + 'static,
    {
        Self::from_arc(Arc::new(node), executor)
    }

    /// Wraps an already shared node.
    #[must_use]
    pub fn from_arc(inner: Arc<dyn Node<I, O>>, executor: Arc<WorkerPool>) -> Self {
        Self {
            inner,
            executor,
            reporter: OnceLock::new(),
        }
    }

    /// Returns the pool this node runs on.
    #[must_use]
    pub fn executor(&self) -> &Arc<WorkerPool> {
        &self.executor
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> Inlet<I> for ExecutionDecorator<I, O> {
    async fn process(&self, input: I) {
        let inner = self.inner.clone();
        let submitted = self.executor.submit(async move {
            inner.process(input).await;
        });

        if let Err(err) = submitted {
            let stage = self.inner.name();
            warn!(stage, pool = %self.executor.name(), "Dropping input: {}", err);
            if let Some(reporter) = self.reporter.get() {
                reporter.report(StageFailure::new(
                    stage,
                    StageErrorKind::Rejected,
                    err.to_string(),
                ));
            }
        }
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> Lifecycle for ExecutionDecorator<I, O> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn bind_reporter(&self, reporter: &Arc<dyn ErrorReporter>) {
        let _ = self.reporter.set(reporter.clone());
        self.inner.bind_reporter(reporter);
    }

    async fn init(&self, ctx: Arc<PipelineContext>) -> Result<(), StageError> {
        self.bind_reporter(ctx.error_reporter());
        self.inner.init(ctx).await
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        self.inner.shutdown().await
    }
}

impl<I: Send + 'static, O: Send + 'static> Node<I, O> for ExecutionDecorator<I, O> {
    fn set_next_stage(&self, next: Arc<dyn Inlet<O>>) -> Result<(), PipelineError> {
        self.inner.set_next_stage(next)
    }

    fn is_linked(&self) -> bool {
        self.inner.is_linked()
    }
}

impl<I: Send + 'static, O: Send + 'static> std::fmt::Debug for ExecutionDecorator<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDecorator")
            .field("stage", &self.inner.name())
            .field("executor", &self.executor.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingErrorReporter;
    use crate::executor::PoolConfig;
    use crate::stages::{FnStage, StageNode};
    use crate::testing::CollectingStage;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_process_runs_on_executor() {
        let pool = WorkerPool::single("decorated").unwrap();
        let collector = CollectingStage::<i32>::new("collect");
        let sink = collector.sink();

        let decorated = ExecutionDecorator::new(
            StageNode::new(FnStage::map("inc", |x: i32| x + 1)),
            pool.clone(),
        );
        decorated
            .set_next_stage(Arc::new(StageNode::new(collector)))
            .unwrap();

        decorated.process(1).await;
        decorated.process(2).await;

        assert_eq!(sink.wait_for(2, Duration::from_secs(5)).await, vec![2, 3]);
        assert_eq!(pool.metrics().submitted, 2);
    }

    #[tokio::test]
    async fn test_process_does_not_wait_for_blocked_executor() {
        let pool = WorkerPool::single("blocked").unwrap();
        let gate = Arc::new(Notify::new());
        let blocker = gate.clone();
        pool.submit(async move { blocker.notified().await }).unwrap();
        tokio::task::yield_now().await;

        let decorated = ExecutionDecorator::new(
            StageNode::new(FnStage::map("inc", |x: i32| x + 1)),
            pool.clone(),
        );

        let returned = tokio::time::timeout(Duration::from_millis(200), async {
            for i in 0..10 {
                decorated.process(i).await;
            }
        })
        .await;
        assert!(returned.is_ok());
        assert_eq!(pool.metrics().queued, 10);

        gate.notify_one();
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let pool = WorkerPool::new(PoolConfig::new("tiny").with_queue_capacity(1)).unwrap();
        let gate = Arc::new(Notify::new());
        let blocker = gate.clone();
        pool.submit(async move { blocker.notified().await }).unwrap();
        tokio::task::yield_now().await;

        let reporter = Arc::new(CollectingErrorReporter::new());
        let ctx = PipelineContext::builder()
            .error_reporter(reporter.clone())
            .build();
        let decorated = ExecutionDecorator::new(
            StageNode::new(FnStage::map("inc", |x: i32| x + 1)),
            pool.clone(),
        );
        decorated.init(ctx).await.unwrap();

        decorated.process(1).await;
        decorated.process(2).await;

        let failures = reporter.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, "inc");
        assert_eq!(failures[0].kind, StageErrorKind::Rejected);

        gate.notify_one();
    }

    #[tokio::test]
    async fn test_decorator_does_not_shut_down_executor() {
        let pool = WorkerPool::single("shared").unwrap();
        let decorated = ExecutionDecorator::new(
            StageNode::new(FnStage::map("inc", |x: i32| x + 1)),
            pool.clone(),
        );

        decorated.shutdown().await.unwrap();
        assert!(!pool.is_shutdown());
        assert_eq!(decorated.name(), "inc");
    }
}
