//! # Tunnelflow
//!
//! A multi-stage concurrent processing pipeline for change-data-capture
//! tunnel clients.
//!
//! Tunnelflow provides:
//!
//! - **Typed stage chains**: stages are linked into a singly-linked chain whose
//!   element types are checked at compile time
//! - **Per-stage isolation**: any stage can run on its own worker pool, so a
//!   slow stage backs up only its own queue
//! - **Composable pipelines**: a pipeline is itself a stage and can be nested
//! - **Asynchronous initialization**: `init` links the chain and returns while
//!   the stages set themselves up on a helper pool
//! - **Cooperative shutdown**: every stage is shut down once, in order, even
//!   when some fail
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tunnelflow::prelude::*;
//!
//! let pipeline = Pipeline::builder("numbers")
//!     .stage(FnStage::map("double", |x: i64| x * 2))
//!     .stage_with_executor(FnStage::map("increment", |x: i64| x + 1), WorkerPool::single("inc")?)
//!     .stage(FnStage::map("render", |x: i64| x.to_string()))
//!     .build()?;
//!
//! pipeline.init(PipelineContext::new())?;
//! pipeline.wait_initialized().await?;
//! pipeline.process(1).await;
//! pipeline.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;
pub mod tunnel;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{PipelineContext, PipelineContextBuilder, RunIdentity};
    pub use crate::errors::{
        PipelineError, PipelineResult, RejectReason, StageError, StageErrorKind,
    };
    pub use crate::events::{
        ChannelErrorReporter, CollectingErrorReporter, ErrorReporter, LoggingErrorReporter,
        NoOpErrorReporter, StageFailure,
    };
    pub use crate::executor::{ExecutionDecorator, PoolConfig, PoolMetrics, WorkerPool};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{InitReport, Pipeline, PipelineBuilder, PipelineConfig};
    pub use crate::stages::{
        AsyncFnStage, FnStage, Inlet, Lifecycle, Link, Node, NoOpStage, Stage, StageNode,
    };
    pub use crate::tunnel::{
        ApplyStage, ChannelCursor, Checkpoint, CheckpointStage, CheckpointStore, FetchStage,
        InMemoryCheckpointStore, RecordAction, RecordApplier, RecordBatch, RecordFetcher,
        StreamRecord,
    };
}
