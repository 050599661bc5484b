//! Shared context for pipeline initialization.
//!
//! This module provides:
//! - The run identity used to correlate logs
//! - The immutable pipeline context handed to every stage

mod identity;
mod pipeline_context;

pub use identity::RunIdentity;
pub use pipeline_context::{PipelineContext, PipelineContextBuilder};
