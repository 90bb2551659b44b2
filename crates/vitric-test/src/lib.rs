//! Test registry for the Vitric toolkit.
//!
//! Maps test names to thunks and runs them all, tallying successes and
//! failures. A panicking thunk fails its test without aborting the run.
//! Independent of the GPU crates.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

type TestFn = Box<dyn Fn() + Send>;

/// Pass/fail counts of a full run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
}

/// Name-keyed registry of test thunks; runs in name order.
#[derive(Default)]
pub struct TestRegistry {
    tests: BTreeMap<String, TestFn>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test. Re-registering a name replaces the previous thunk.
    pub fn register(&mut self, name: impl Into<String>, f: impl Fn() + Send + 'static) {
        self.tests.insert(name.into(), Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Run every registered test and tally the outcome.
    pub fn run_all(&self) -> TestReport {
        let mut report = TestReport::default();
        if self.tests.is_empty() {
            tracing::info!("no test to run");
            return report;
        }
        tracing::info!("scheduling {} tests", self.tests.len());

        for (name, f) in &self.tests {
            tracing::info!("[{name}]");
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => report.passed += 1,
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| payload.downcast_ref::<&str>().copied())
                        .unwrap_or("test panicked without a message");
                    tracing::error!("unit test '{name}' failed: {msg}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_passes_and_failures() {
        let mut registry = TestRegistry::new();
        registry.register("passes", || {});
        registry.register("fails", || panic!("intentional"));
        registry.register("also_passes", || assert_eq!(2 + 2, 4));

        let report = registry.run_all();
        assert_eq!(
            report,
            TestReport {
                passed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn empty_registry_reports_nothing() {
        let registry = TestRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.run_all(), TestReport::default());
    }

    #[test]
    fn failure_does_not_abort_the_run() {
        let mut registry = TestRegistry::new();
        registry.register("a_fails_first", || panic!("boom"));
        registry.register("z_still_runs", || {});
        let report = registry.run_all();
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
    }
}
