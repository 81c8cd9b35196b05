//! Test reporting sink.
//!
//! Reports go to the CI dashboard's test API so each remote build shows up as
//! a test with its own outcome. Reporting is best-effort: callers log sink
//! errors and carry on.

use crate::client::parse_base_url;
use crate::error::{ReportError, ServiceError, truncate_body};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use suiterun_common::{ReportingConfig, RunResult, TestOutcome};
use tracing::debug;

/// A status change for one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUpdate {
    pub test_name: String,
    pub outcome: TestOutcome,
    /// Captured build output, attached to failures.
    pub std_out: Option<String>,
    pub duration: Option<Duration>,
}

impl TestUpdate {
    pub fn running(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            outcome: TestOutcome::Running,
            std_out: None,
            duration: None,
        }
    }

    pub fn finished(result: &RunResult) -> Self {
        Self {
            test_name: result.test_name.clone(),
            outcome: result.outcome.into(),
            std_out: result.log.clone(),
            duration: result.build_duration,
        }
    }
}

#[async_trait]
pub trait ReportingSink: Send + Sync {
    /// Register a test before any test starts.
    async fn test_queued(&self, test_name: &str) -> Result<(), ReportError>;

    async fn test_outcome(&self, update: &TestUpdate) -> Result<(), ReportError>;
}

/// Sink used outside CI.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ReportingSink for NoopSink {
    async fn test_queued(&self, _test_name: &str) -> Result<(), ReportError> {
        Ok(())
    }

    async fn test_outcome(&self, _update: &TestUpdate) -> Result<(), ReportError> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddTestRequest<'a> {
    test_name: &'a str,
    test_framework: &'a str,
    outcome: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTestRequest<'a> {
    test_name: &'a str,
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    std_out: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_milliseconds: Option<u64>,
}

/// Client for the build worker's test API (`api/tests`).
#[derive(Debug, Clone)]
pub struct WorkerApiSink {
    client: Client,
    tests_url: Url,
    framework: String,
}

impl WorkerApiSink {
    pub fn new(
        api_url: &str,
        framework: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ReportError> {
        let mut tests_url = parse_base_url(api_url).map_err(|e| match e {
            ServiceError::InvalidUrl { url, reason } => ReportError::InvalidUrl { url, reason },
            other => ReportError::InvalidUrl {
                url: api_url.to_string(),
                reason: other.to_string(),
            },
        })?;
        if let Ok(mut path) = tests_url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "tests"]);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReportError::Client)?;
        Ok(Self {
            client,
            tests_url,
            framework: framework.into(),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), ReportError> {
        let response = request.send().await.map_err(ReportError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReportingSink for WorkerApiSink {
    async fn test_queued(&self, test_name: &str) -> Result<(), ReportError> {
        debug!(test = test_name, "registering test");
        let body = AddTestRequest {
            test_name,
            test_framework: &self.framework,
            outcome: TestOutcome::None.to_string(),
        };
        self.send(self.client.post(self.tests_url.clone()).json(&body))
            .await
    }

    async fn test_outcome(&self, update: &TestUpdate) -> Result<(), ReportError> {
        debug!(test = %update.test_name, outcome = %update.outcome, "updating test");
        let body = UpdateTestRequest {
            test_name: &update.test_name,
            outcome: update.outcome.to_string(),
            std_out: update.std_out.as_deref(),
            duration_milliseconds: update
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };
        self.send(self.client.put(self.tests_url.clone()).json(&body))
            .await
    }
}

/// The sink `config` asks for: the worker API inside CI, otherwise a no-op.
pub fn sink_from_config(config: &ReportingConfig) -> Result<Arc<dyn ReportingSink>, ReportError> {
    match (config.enabled, config.api_url.value.as_deref()) {
        (true, Some(url)) => Ok(Arc::new(WorkerApiSink::new(
            url,
            config.framework.clone(),
            config.client_timeout,
        )?)),
        _ => Ok(Arc::new(NoopSink)),
    }
}
