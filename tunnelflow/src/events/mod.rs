//! Failure reporting for observability.
//!
//! Stages that run on their own worker pools cannot return errors to the
//! driver. This module provides the failure record and the reporters that
//! carry those failures to an operator.

mod failure;
mod reporter;

pub use failure::StageFailure;
pub use reporter::{
    ChannelErrorReporter, CollectingErrorReporter, ErrorReporter, LoggingErrorReporter,
    NoOpErrorReporter,
};

#[cfg(test)]
pub use reporter::MockErrorReporter;
