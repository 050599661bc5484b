//! Execution resources for isolating stages.
//!
//! This module provides:
//! - A Tokio worker pool with bounded or unbounded queues
//! - The decorator that moves a stage's processing onto such a pool

mod config;
mod decorator;
mod pool;

pub use config::PoolConfig;
pub use decorator::ExecutionDecorator;
pub(crate) use pool::panic_message;
pub use pool::{PoolMetrics, TaskFailure, TaskFailureHook, WorkerPool};
