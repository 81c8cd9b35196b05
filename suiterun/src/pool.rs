//! Bounded worker pool.
//!
//! Every test is registered with the sink before any build is submitted.
//! Tests are then admitted in input order while at most `concurrency`
//! monitors run at once. The pool waits for all of them; one failing test
//! never stops the others.

use crate::client::BuildService;
use crate::monitor::BuildMonitor;
use crate::reporting::ReportingSink;
use std::sync::Arc;
use suiterun_common::{RunResult, RunnerConfig, TestItem};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Aggregate of one suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteSummary {
    /// Results in completion order.
    pub results: Vec<RunResult>,
    pub passed: usize,
    pub failed: usize,
    /// Monitors that died without producing a result. Counted as failures.
    pub panicked: usize,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.panicked
    }

    /// The suite-wide verdict: true if any test failed or panicked.
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.panicked > 0
    }

    fn record(&mut self, result: RunResult) {
        if result.is_failure() {
            self.failed += 1;
        } else {
            self.passed += 1;
        }
        self.results.push(result);
    }
}

pub struct WorkerPool {
    monitor: Arc<BuildMonitor>,
    sink: Arc<dyn ReportingSink>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        config: &RunnerConfig,
        service: Arc<dyn BuildService>,
        sink: Arc<dyn ReportingSink>,
    ) -> Self {
        let monitor = BuildMonitor::new(
            service,
            Arc::clone(&sink),
            config.timings,
            config.default_build_env.clone(),
        );
        Self::with_monitor(Arc::new(monitor), sink, config.concurrency.value)
    }

    pub fn with_monitor(
        monitor: Arc<BuildMonitor>,
        sink: Arc<dyn ReportingSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            monitor,
            sink,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every item and wait for all of them.
    pub async fn run(&self, items: Vec<TestItem>) -> SuiteSummary {
        let total = items.len();
        info!(tests = total, concurrency = self.concurrency, "starting test suite");

        for item in &items {
            if let Err(e) = self.sink.test_queued(&item.test_name).await {
                warn!(test = %item.test_name, error = %e, "cannot register test");
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            info!(test = %item.test_name, "Running test [{}/{}]", index + 1, total);

            let monitor = Arc::clone(&self.monitor);
            set.spawn(async move {
                let result = monitor.run(&item).await;
                drop(permit);
                result
            });
        }

        let mut summary = SuiteSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => summary.record(result),
                Err(e) => {
                    error!(error = %e, "test monitor terminated abnormally");
                    summary.panicked += 1;
                }
            }
        }

        info!(
            passed = summary.passed,
            failed = summary.failed,
            panicked = summary.panicked,
            "test suite finished"
        );
        summary
    }
}
