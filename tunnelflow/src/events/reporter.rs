//! Error reporter trait and implementations.

use super::StageFailure;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};

/// Receives stage failures that cannot propagate back to the driver.
///
/// Decorated stages run on their own worker pools, so a failed input never
/// returns to the caller of `process`. Reporters make those failures visible
/// to an operator. Implementations must not block and must not panic.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    /// Delivers a failure.
    fn report(&self, failure: StageFailure);
}

/// A reporter that discards all failures.
///
/// Used as the default; stage nodes always log failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpErrorReporter;

impl ErrorReporter for NoOpErrorReporter {
    fn report(&self, _failure: StageFailure) {}
}

/// A reporter that logs failures using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingErrorReporter {
    level: Level,
}

impl Default for LoggingErrorReporter {
    fn default() -> Self {
        Self { level: Level::ERROR }
    }
}

impl LoggingErrorReporter {
    /// Creates a new logging reporter with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl ErrorReporter for LoggingErrorReporter {
    fn report(&self, failure: StageFailure) {
        let StageFailure {
            stage,
            kind,
            message,
            input,
            ..
        } = &failure;
        match self.level {
            Level::ERROR => error!(%stage, %kind, ?input, "Stage failure: {}", message),
            Level::WARN => warn!(%stage, %kind, ?input, "Stage failure: {}", message),
            Level::INFO => info!(%stage, %kind, ?input, "Stage failure: {}", message),
            _ => debug!(%stage, %kind, ?input, "Stage failure: {}", message),
        }
    }
}

/// A reporter that forwards failures into a bounded channel.
///
/// When the channel is full the failure is dropped and counted, so a slow
/// consumer never stalls a stage.
#[derive(Debug)]
pub struct ChannelErrorReporter {
    tx: mpsc::Sender<StageFailure>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelErrorReporter {
    /// Creates a reporter and the receiving end of its channel.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<StageFailure>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Returns the number of failures delivered to the channel.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of failures dropped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ErrorReporter for ChannelErrorReporter {
    fn report(&self, failure: StageFailure) {
        match self.tx.try_send(failure) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(failure)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(stage = %failure.stage, "Failure channel full, dropping report");
            }
            Err(mpsc::error::TrySendError::Closed(failure)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(stage = %failure.stage, "Failure channel closed, dropping report");
            }
        }
    }
}

/// A collecting reporter for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingErrorReporter {
    failures: RwLock<Vec<StageFailure>>,
}

impl CollectingErrorReporter {
    /// Creates a new collecting reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected failures.
    #[must_use]
    pub fn failures(&self) -> Vec<StageFailure> {
        self.failures.read().clone()
    }

    /// Returns the number of collected failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.read().len()
    }

    /// Returns true if no failures have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.read().is_empty()
    }

    /// Returns failures recorded for a stage.
    #[must_use]
    pub fn failures_for(&self, stage: &str) -> Vec<StageFailure> {
        self.failures
            .read()
            .iter()
            .filter(|f| f.stage == stage)
            .cloned()
            .collect()
    }

    /// Clears all collected failures.
    pub fn clear(&self) {
        self.failures.write().clear();
    }
}

impl ErrorReporter for CollectingErrorReporter {
    fn report(&self, failure: StageFailure) {
        self.failures.write().push(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageErrorKind;

    fn failure(stage: &str) -> StageFailure {
        StageFailure::new(stage, StageErrorKind::Process, "bad input")
    }

    #[test]
    fn test_noop_reporter() {
        NoOpErrorReporter.report(failure("a"));
        // Should not panic
    }

    #[test]
    fn test_logging_reporter_levels() {
        LoggingErrorReporter::default().report(failure("a"));
        LoggingErrorReporter::new(Level::WARN).report(failure("b"));
        LoggingErrorReporter::new(Level::TRACE).report(failure("c"));
        // Should not panic
    }

    #[tokio::test]
    async fn test_channel_reporter_delivers() {
        let (reporter, mut rx) = ChannelErrorReporter::bounded(4);
        reporter.report(failure("decode"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.stage, "decode");
        assert_eq!(reporter.delivered(), 1);
        assert_eq!(reporter.dropped(), 0);
    }

    #[test]
    fn test_channel_reporter_drops_when_full() {
        let (reporter, _rx) = ChannelErrorReporter::bounded(2);
        for i in 0..5 {
            reporter.report(failure(&format!("stage-{i}")));
        }

        assert_eq!(reporter.delivered(), 2);
        assert_eq!(reporter.dropped(), 3);
    }

    #[test]
    fn test_channel_reporter_closed_receiver() {
        let (reporter, rx) = ChannelErrorReporter::bounded(2);
        drop(rx);
        reporter.report(failure("a"));
        assert_eq!(reporter.dropped(), 1);
    }

    #[test]
    fn test_collecting_reporter_filter() {
        let reporter = CollectingErrorReporter::new();
        reporter.report(failure("fetch"));
        reporter.report(failure("apply"));
        reporter.report(failure("fetch"));

        assert_eq!(reporter.len(), 3);
        assert_eq!(reporter.failures_for("fetch").len(), 2);

        reporter.clear();
        assert!(reporter.is_empty());
    }
}
