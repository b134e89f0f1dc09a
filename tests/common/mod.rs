//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use imgpipe_rs::pipeline::{ErrorKind, RunReport};
use std::time::Duration;

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Sequence numbers `0..n`
pub fn expected_seqs(n: u64) -> Vec<u64> {
    (0..n).collect()
}

/// Assert the report's error list holds exactly these `(seq, kind)` pairs
pub fn assert_errors(report: &RunReport, expected: &[(Option<u64>, ErrorKind)]) {
    let mut actual: Vec<(Option<u64>, ErrorKind)> = report
        .errors
        .iter()
        .map(|e| (e.seq.map(|s| s.value()), e.kind))
        .collect();
    let mut expected = expected.to_vec();
    actual.sort_by_key(|(seq, _)| *seq);
    expected.sort_by_key(|(seq, _)| *seq);
    assert_eq!(actual, expected, "unexpected error list: {:#?}", report.errors);
}

/// Assert every spawned thread was joined and none panicked
pub fn assert_threads_released(report: &RunReport) {
    assert_eq!(
        report.threads_spawned, report.threads_joined,
        "spawned {} threads but joined {}",
        report.threads_spawned, report.threads_joined
    );
    assert_eq!(report.threads_panicked, 0);
}
