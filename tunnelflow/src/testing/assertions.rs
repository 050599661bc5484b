//! Assertions over pipeline initialization reports.

use crate::errors::StageErrorKind;
use crate::pipeline::InitReport;

/// Asserts that every stage initialized.
///
/// # Panics
///
/// Panics if the report contains failures.
pub fn assert_init_complete(report: &InitReport) {
    assert!(
        report.is_complete(),
        "Expected pipeline '{}' to initialize fully, but these stages failed: {:?}",
        report.pipeline,
        report.failed_stages()
    );
}

/// Asserts the exact stages that failed to initialize, in order.
///
/// # Panics
///
/// Panics if the failed stage names differ from `expected`.
pub fn assert_init_failed(report: &InitReport, expected: &[&str]) {
    let failed = report.failed_stages();
    assert_eq!(
        failed, expected,
        "Unexpected init failures for pipeline '{}'",
        report.pipeline
    );
}

/// Asserts that `stage` failed to initialize with the given kind.
///
/// # Panics
///
/// Panics if no failure for `stage` exists or its kind differs.
pub fn assert_failure_kind(report: &InitReport, stage: &str, kind: StageErrorKind) {
    let failure = report
        .failures
        .iter()
        .find(|failure| failure.stage == stage)
        .unwrap_or_else(|| panic!("No init failure recorded for stage '{stage}'"));
    assert_eq!(
        failure.kind, kind,
        "Stage '{stage}' failed with {} instead of {kind}",
        failure.kind
    );
}
