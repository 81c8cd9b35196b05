//! Common types used across suiterun components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One test case: a remote build plus the outcome it is expected to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestItem {
    /// Unique name within a suite. Reporting is keyed by it.
    pub test_name: String,
    /// Account that owns the project on the build service.
    pub account_name: String,
    /// Project slug on the build service.
    pub project_slug: String,
    /// Branch to build.
    pub branch: String,
    /// Whether the remote build is expected to succeed.
    #[serde(default = "default_true")]
    pub should_succeed: bool,
    /// Per-test build environment variables. Win over service defaults.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Running-phase timeout override, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    /// Provisioning-phase timeout override, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_timeout_minutes: Option<u64>,
    /// Image tags this test applies to. Empty means every image.
    #[serde(default)]
    pub images: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn minutes_or(minutes: Option<u64>, default: Duration) -> Duration {
    minutes
        .filter(|m| *m > 0)
        .map(|m| Duration::from_secs(m.saturating_mul(60)))
        .unwrap_or(default)
}

impl TestItem {
    /// Create an item with no overrides that is expected to succeed.
    pub fn new(
        test_name: impl Into<String>,
        account_name: impl Into<String>,
        project_slug: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            account_name: account_name.into(),
            project_slug: project_slug.into(),
            branch: branch.into(),
            should_succeed: true,
            environment_variables: BTreeMap::new(),
            timeout_minutes: None,
            provisioning_timeout_minutes: None,
            images: Vec::new(),
        }
    }

    pub fn expecting_failure(mut self) -> Self {
        self.should_succeed = false;
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(name.into(), value.into());
        self
    }

    /// Running timeout for this item, falling back to `default`.
    /// Zero minutes means "not set".
    pub fn running_timeout(&self, default: Duration) -> Duration {
        minutes_or(self.timeout_minutes, default)
    }

    /// Provisioning timeout for this item, falling back to `default`.
    /// Zero minutes means "not set".
    pub fn provisioning_timeout(&self, default: Duration) -> Duration {
        minutes_or(self.provisioning_timeout_minutes, default)
    }

    /// Whether this item applies to the given image tag.
    pub fn matches_image(&self, image: &str) -> bool {
        self.images.is_empty() || self.images.iter().any(|i| i == image)
    }
}

/// Job or build status as reported by the build service.
///
/// Statuses this crate does not know are kept verbatim in `Other` and
/// treated as "still in progress".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildStatus {
    Queued,
    Starting,
    Running,
    Success,
    Failed,
    Cancelled,
    Cancelling,
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Cancelling => "cancelling",
            Self::Other(s) => s,
        }
    }

    /// Queued or starting: the build has not been picked up by a worker yet.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Queued | Self::Starting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl From<String> for BuildStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "cancelling" => Self::Cancelling,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for BuildStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<BuildStatus> for String {
    fn from(value: BuildStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single job of a remote build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: BuildStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub finished: Option<DateTime<Utc>>,
}

impl JobSummary {
    pub fn new(job_id: impl Into<String>, status: impl Into<BuildStatus>) -> Self {
        Self {
            job_id: job_id.into(),
            status: status.into(),
            started: None,
            finished: None,
        }
    }
}

/// Snapshot of a remote build and its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDetails {
    pub version: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub jobs: Vec<JobSummary>,
}

impl BuildDetails {
    pub fn first_job(&self) -> Option<&JobSummary> {
        self.jobs.first()
    }
}

/// Unset timestamps come back as placeholders the service cannot parse
/// itself ("0001-01-01T00:00:00"); those map to `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}

/// Final verdict of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome vocabulary of the test reporting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    None,
    Running,
    Passed,
    Failed,
}

impl From<Outcome> for TestOutcome {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Passed => Self::Passed,
            Outcome::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Running => write!(f, "Running"),
            Self::Passed => write!(f, "Passed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What a build monitor hands back to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub test_name: String,
    pub outcome: Outcome,
    /// Build log, captured only for failures that warrant it.
    pub log: Option<String>,
    /// Why the test failed.
    pub error: Option<String>,
    /// Build duration from the job's own timestamps, when known.
    pub build_duration: Option<Duration>,
}

impl RunResult {
    pub fn passed(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            outcome: Outcome::Passed,
            log: None,
            error: None,
            build_duration: None,
        }
    }

    pub fn failed(test_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            outcome: Outcome::Failed,
            log: None,
            error: Some(error.into()),
            build_duration: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_deserializes_with_defaults() {
        let json = r#"{
            "testName": "vs2019-hello",
            "accountName": "acme",
            "projectSlug": "hello",
            "branch": "master"
        }"#;
        let item: TestItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.test_name, "vs2019-hello");
        assert!(item.should_succeed);
        assert!(item.environment_variables.is_empty());
        assert!(item.images.is_empty());
        assert_eq!(item.timeout_minutes, None);
    }

    #[test]
    fn test_item_timeout_overrides() {
        let mut item = TestItem::new("t", "a", "p", "b");
        let default = Duration::from_secs(600);
        assert_eq!(item.running_timeout(default), default);
        assert_eq!(item.provisioning_timeout(default), default);

        item.timeout_minutes = Some(30);
        item.provisioning_timeout_minutes = Some(2);
        assert_eq!(item.running_timeout(default), Duration::from_secs(1800));
        assert_eq!(item.provisioning_timeout(default), Duration::from_secs(120));
    }

    #[test]
    fn test_item_matches_image() {
        let mut item = TestItem::new("t", "a", "p", "b");
        assert!(item.matches_image("Ubuntu"));

        item.images = vec!["Ubuntu".into(), "macOS".into()];
        assert!(item.matches_image("macOS"));
        assert!(!item.matches_image("Visual Studio 2019"));
    }

    #[test]
    fn test_build_status_parsing() {
        assert_eq!(BuildStatus::from("queued"), BuildStatus::Queued);
        assert_eq!(BuildStatus::from("Running"), BuildStatus::Running);
        assert_eq!(BuildStatus::from("cancelling"), BuildStatus::Cancelling);
        assert_eq!(
            BuildStatus::from("transferring"),
            BuildStatus::Other("transferring".into())
        );
        assert_eq!(BuildStatus::from("transferring").to_string(), "transferring");
    }

    #[test]
    fn test_build_status_classification() {
        assert!(BuildStatus::Queued.is_provisioning());
        assert!(BuildStatus::Starting.is_provisioning());
        assert!(!BuildStatus::Running.is_provisioning());
        assert!(BuildStatus::Cancelled.is_terminal());
        assert!(!BuildStatus::Cancelling.is_terminal());
        assert!(!BuildStatus::Other("x".into()).is_terminal());
    }

    #[test]
    fn test_zero_minute_timeouts_mean_unset() {
        let json = r#"{
            "testName": "t",
            "accountName": "acme",
            "projectSlug": "hello",
            "branch": "master",
            "timeoutMinutes": 0,
            "provisioningTimeoutMinutes": 0
        }"#;
        let item: TestItem = serde_json::from_str(json).unwrap();
        let default = Duration::from_secs(600);
        assert_eq!(item.running_timeout(default), default);
        assert_eq!(item.provisioning_timeout(default), default);
    }

    #[test]
    fn test_job_summary_lenient_timestamps() {
        let json = r#"{
            "jobId": "abc123",
            "status": "success",
            "started": "2024-03-01T10:00:00.5591562+00:00",
            "finished": "0001-01-01T00:00:00"
        }"#;
        let job: JobSummary = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, BuildStatus::Success);
        assert!(job.started.is_some());
        assert!(job.finished.is_none());
    }

    #[test]
    fn test_outcome_maps_to_report_outcome() {
        assert_eq!(TestOutcome::from(Outcome::Passed), TestOutcome::Passed);
        assert_eq!(TestOutcome::from(Outcome::Failed).to_string(), "Failed");
    }

    #[test]
    fn test_run_result_constructors() {
        let ok = RunResult::passed("t1");
        assert!(!ok.is_failure());
        assert!(ok.error.is_none());

        let bad = RunResult::failed("t2", "build has failed");
        assert!(bad.is_failure());
        assert_eq!(bad.error.as_deref(), Some("build has failed"));
    }
}
