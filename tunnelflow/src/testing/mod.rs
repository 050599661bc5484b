//! Testing utilities for tunnelflow pipelines.
//!
//! This module provides:
//! - Instrumented stages that count lifecycle calls or block on a gate
//! - Shared probes and logs for observing call order
//! - Assertions over initialization reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failure_kind, assert_init_complete, assert_init_failed};
pub use fixtures::{eventually, Gate, LifecycleLog, StageProbe};
pub use mocks::{BlockingStage, Collected, CollectingStage, RecordingStage};
