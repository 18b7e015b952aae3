//! Run-wide aggregation of completed probes.
//!
//! Purely additive: every resolved pipeline appends a [`TestRecord`], and
//! [`ReportCollector::summary`] folds the records into counts by status and
//! the sets of test names carrying fatal or warning-level failures.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use http::Method;

use crate::assertion::{AssertionResult, AssertionStatus, Severity};

/// Per-probe detail recorded at resolution.
#[derive(Debug, Clone)]
pub struct TestRecord {
    /// Probe name.
    pub name: String,
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: String,
    /// Launch-to-resolution duration.
    pub duration: Duration,
    /// Every assertion result the probe produced.
    pub results: Vec<AssertionResult>,
}

/// Thread-safe, append-only collection of completed probes.
#[derive(Debug, Default)]
pub struct ReportCollector {
    records: Mutex<Vec<TestRecord>>,
}

impl ReportCollector {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub(crate) fn record(&self, record: TestRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Snapshot of every recorded probe.
    #[must_use]
    pub fn records(&self) -> Vec<TestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fold the recorded probes into summary statistics.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let records = self.records();
        let mut summary = RunSummary {
            total_tests: records.len(),
            ..RunSummary::default()
        };
        for record in &records {
            for result in &record.results {
                summary.total_assertions += 1;
                match result.status() {
                    AssertionStatus::Success => summary.successes += 1,
                    AssertionStatus::Failure => summary.failures += 1,
                    AssertionStatus::InternalError => summary.internal_errors += 1,
                    AssertionStatus::DidNotRun => summary.did_not_run += 1,
                }
                if !result.is_success() {
                    match result.severity() {
                        Severity::Fatal => {
                            summary.fatal_tests.insert(record.name.clone());
                        }
                        Severity::Warning => {
                            summary.warned_tests.insert(record.name.clone());
                        }
                    }
                }
            }
        }
        summary
    }
}

/// Summary statistics across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of recorded probes.
    pub total_tests: usize,
    /// Number of assertion results across all probes.
    pub total_assertions: usize,
    /// Results with status success.
    pub successes: usize,
    /// Results with status failure.
    pub failures: usize,
    /// Results with status internal error.
    pub internal_errors: usize,
    /// Results swept to did-not-run.
    pub did_not_run: usize,
    /// Probes with at least one fatal-severity non-success.
    pub fatal_tests: BTreeSet<String>,
    /// Probes with at least one warning-severity non-success.
    pub warned_tests: BTreeSet<String>,
}

impl RunSummary {
    /// Whether no fatal-severity result failed anywhere in the run.
    #[must_use]
    pub fn is_clean(&self) -> bool { self.fatal_tests.is_empty() }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} test(s), {} assertion(s): {} ok, {} failed, {} internal error(s), {} did not run",
            self.total_tests,
            self.total_assertions,
            self.successes,
            self.failures,
            self.internal_errors,
            self.did_not_run
        )?;
        if !self.fatal_tests.is_empty() {
            write!(f, "; fatal: ")?;
            write_names(f, &self.fatal_tests)?;
        }
        if !self.warned_tests.is_empty() {
            write!(f, "; warned: ")?;
            write_names(f, &self.warned_tests)?;
        }
        Ok(())
    }
}

fn write_names(f: &mut fmt::Formatter<'_>, names: &BTreeSet<String>) -> fmt::Result {
    for (index, name) in names.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name}")?;
    }
    Ok(())
}
