//! Pipeline building and lifecycle.
//!
//! This module provides:
//! - The typed, append-only pipeline builder
//! - The composite pipeline stage with background initialization
//! - JSON pipeline configuration

mod builder;
mod composite;
mod config;
mod init;


pub use builder::PipelineBuilder;
pub use composite::Pipeline;
pub use config::PipelineConfig;
pub use init::InitReport;
