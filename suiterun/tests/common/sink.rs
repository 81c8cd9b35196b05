use async_trait::async_trait;
use std::sync::Mutex;
use suiterun::{ReportError, ReportingSink, TestUpdate};
use suiterun_common::TestOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Queued(String),
    Updated(TestUpdate),
}

#[derive(Debug, Default)]
struct Counters {
    events: Vec<SinkEvent>,
    active: usize,
    max_active: usize,
}

/// Records every callback and tracks how many tests are running at once.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Counters>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn max_active(&self) -> usize {
        self.inner.lock().unwrap().max_active
    }

    /// Final updates for `test_name`, in order.
    pub fn finished(&self, test_name: &str) -> Vec<TestUpdate> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Updated(update)
                    if update.test_name == test_name && is_final(update.outcome) =>
                {
                    Some(update)
                }
                _ => None,
            })
            .collect()
    }

    /// Test names in the order they reported `Running`.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Updated(update) if update.outcome == TestOutcome::Running => {
                    Some(update.test_name)
                }
                _ => None,
            })
            .collect()
    }
}

fn is_final(outcome: TestOutcome) -> bool {
    matches!(outcome, TestOutcome::Passed | TestOutcome::Failed)
}

#[async_trait]
impl ReportingSink for RecordingSink {
    async fn test_queued(&self, test_name: &str) -> Result<(), ReportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(SinkEvent::Queued(test_name.to_string()));
        Ok(())
    }

    async fn test_outcome(&self, update: &TestUpdate) -> Result<(), ReportError> {
        let mut inner = self.inner.lock().unwrap();
        if update.outcome == TestOutcome::Running {
            inner.active += 1;
            inner.max_active = inner.max_active.max(inner.active);
        } else if is_final(update.outcome) {
            inner.active = inner.active.saturating_sub(1);
        }
        inner.events.push(SinkEvent::Updated(update.clone()));
        Ok(())
    }
}

/// A sink whose every call fails.
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl ReportingSink for FailingSink {
    async fn test_queued(&self, _test_name: &str) -> Result<(), ReportError> {
        Err(ReportError::Status {
            status: 500,
            body: "boom".to_string(),
        })
    }

    async fn test_outcome(&self, _update: &TestUpdate) -> Result<(), ReportError> {
        Err(ReportError::Status {
            status: 500,
            body: "boom".to_string(),
        })
    }
}
