//! Per-test build monitor.
//!
//! A [`BuildMonitor`] drives one remote build from submission to a verdict:
//!
//! ```text
//! Submitting -> Polling -> { TimedOutProvisioning | TimedOutRunning
//!                          | RemoteFailed | RemoteCancelled | RemoteSucceeded }
//!            -> Reporting -> Done
//! ```
//!
//! Only `Polling` repeats. Every failure, remote or local, is folded into a
//! single [`RunResult`]; nothing escapes `run` as an error.

use crate::client::{BuildService, NewBuildRequest};
use crate::error::ServiceError;
use crate::reporting::{ReportingSink, TestUpdate};
use crate::timing::{build_duration, format_elapsed};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use suiterun_common::{BuildStatus, JobSummary, MonitorTimings, Outcome, RunResult, TestItem};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info, info_span, warn};

// ── Monitor State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Submitting,
    Polling,
    TimedOutProvisioning,
    TimedOutRunning,
    RemoteFailed,
    RemoteCancelled,
    RemoteSucceeded,
    Reporting,
    Done,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitting => write!(f, "submitting"),
            Self::Polling => write!(f, "polling"),
            Self::TimedOutProvisioning => write!(f, "timed_out_provisioning"),
            Self::TimedOutRunning => write!(f, "timed_out_running"),
            Self::RemoteFailed => write!(f, "remote_failed"),
            Self::RemoteCancelled => write!(f, "remote_cancelled"),
            Self::RemoteSucceeded => write!(f, "remote_succeeded"),
            Self::Reporting => write!(f, "reporting"),
            Self::Done => write!(f, "done"),
        }
    }
}

// ── Verdicts ─────────────────────────────────────────────────────────────

/// Why a test failed.
#[derive(Debug, Error)]
pub enum MonitorFailure {
    #[error("error starting a new build: {0}")]
    Submit(#[source] ServiceError),

    #[error("error getting build details: {0}")]
    Poll(#[source] ServiceError),

    #[error("build {version} has no jobs")]
    NoJobs { version: String },

    #[error("build has not started in allotted time")]
    ProvisioningTimeout,

    #[error("build has not finished in allotted time")]
    RunningTimeout,

    #[error("build has failed")]
    RemoteFailed,

    #[error("build has been cancelled")]
    RemoteCancelled,

    #[error("build should have failed")]
    UnexpectedSuccess,
}

impl MonitorFailure {
    /// Whether the build log is worth attaching to the result.
    pub fn wants_log(&self) -> bool {
        matches!(
            self,
            Self::RunningTimeout | Self::RemoteFailed | Self::RemoteCancelled | Self::UnexpectedSuccess
        )
    }

    fn state(&self) -> Option<MonitorState> {
        match self {
            Self::ProvisioningTimeout => Some(MonitorState::TimedOutProvisioning),
            Self::RunningTimeout => Some(MonitorState::TimedOutRunning),
            Self::RemoteFailed => Some(MonitorState::RemoteFailed),
            Self::RemoteCancelled => Some(MonitorState::RemoteCancelled),
            Self::UnexpectedSuccess => Some(MonitorState::RemoteSucceeded),
            Self::Submit(_) | Self::Poll(_) | Self::NoJobs { .. } => None,
        }
    }
}

/// Verdict for a build that reached a terminal status, or a local failure.
#[derive(Debug)]
pub enum Judgment {
    Passed,
    Failed(MonitorFailure),
}

impl Judgment {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Passed => Outcome::Passed,
            Self::Failed(_) => Outcome::Failed,
        }
    }
}

/// Map a terminal remote status and the test's expectation to a verdict.
///
/// `None` means the status is not terminal and polling continues.
pub fn judge(status: &BuildStatus, should_succeed: bool) -> Option<Judgment> {
    match status {
        BuildStatus::Success if should_succeed => Some(Judgment::Passed),
        BuildStatus::Success => Some(Judgment::Failed(MonitorFailure::UnexpectedSuccess)),
        BuildStatus::Failed if should_succeed => Some(Judgment::Failed(MonitorFailure::RemoteFailed)),
        BuildStatus::Failed => Some(Judgment::Passed),
        // A cancelled build never counts as the expected outcome.
        BuildStatus::Cancelled => Some(Judgment::Failed(MonitorFailure::RemoteCancelled)),
        _ => None,
    }
}

// ── Build Handle ─────────────────────────────────────────────────────────

/// Result of one status observation.
#[derive(Debug)]
pub enum PollStep {
    Continue,
    /// A phase ran out of time; the build has to be cancelled.
    TimedOut(MonitorFailure),
    Finished(Judgment),
}

/// Phase limits in effect for one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseLimits {
    pub provisioning: Duration,
    pub running: Duration,
}

impl PhaseLimits {
    pub fn for_item(item: &TestItem, timings: &MonitorTimings) -> Self {
        Self {
            provisioning: item.provisioning_timeout(timings.provisioning_timeout),
            running: item.running_timeout(timings.running_timeout),
        }
    }
}

/// Runtime state of one submitted build. Owned by a single monitor.
#[derive(Debug, Clone)]
pub struct BuildHandle {
    pub version: String,
    pub job_id: Option<String>,
    pub last_status: Option<BuildStatus>,
    pub job_started: Option<DateTime<Utc>>,
    pub job_finished: Option<DateTime<Utc>>,
    phase_started: Instant,
    seen_running: bool,
}

impl BuildHandle {
    pub fn new(version: impl Into<String>, submitted_at: Instant) -> Self {
        Self {
            version: version.into(),
            job_id: None,
            last_status: None,
            job_started: None,
            job_finished: None,
            phase_started: submitted_at,
            seen_running: false,
        }
    }

    /// Time spent in the current phase.
    pub fn phase_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.phase_started)
    }

    /// Duration from the job's own timestamps.
    pub fn build_duration(&self) -> Duration {
        build_duration(self.job_started, self.job_finished)
    }

    /// Fold one observation of the build's first job into the handle.
    ///
    /// The first `running` observation re-bases the phase clock, so the
    /// running timeout is measured from the moment the job left provisioning.
    pub fn observe(
        &mut self,
        job: &JobSummary,
        now: Instant,
        limits: PhaseLimits,
        should_succeed: bool,
    ) -> PollStep {
        self.job_id = Some(job.job_id.clone());
        self.job_started = job.started.or(self.job_started);
        self.job_finished = job.finished.or(self.job_finished);

        let elapsed = self.phase_elapsed(now);
        let step = match &job.status {
            status if status.is_provisioning() => {
                if elapsed > limits.provisioning {
                    PollStep::TimedOut(MonitorFailure::ProvisioningTimeout)
                } else {
                    PollStep::Continue
                }
            }
            BuildStatus::Running if !self.seen_running => {
                self.seen_running = true;
                self.phase_started = now;
                PollStep::Continue
            }
            BuildStatus::Running => {
                if elapsed > limits.running {
                    PollStep::TimedOut(MonitorFailure::RunningTimeout)
                } else {
                    PollStep::Continue
                }
            }
            status if status.is_terminal() => {
                judge(status, should_succeed).map_or(PollStep::Continue, PollStep::Finished)
            }
            _ => PollStep::Continue,
        };

        self.last_status = Some(job.status.clone());
        step
    }
}

// ── Monitor ──────────────────────────────────────────────────────────────

/// Runs the build lifecycle of one test at a time. Cheap to share: the pool
/// wraps a single monitor in an `Arc` and runs it for every test.
pub struct BuildMonitor {
    service: Arc<dyn BuildService>,
    sink: Arc<dyn ReportingSink>,
    timings: MonitorTimings,
    default_env: BTreeMap<String, String>,
}

impl BuildMonitor {
    pub fn new(
        service: Arc<dyn BuildService>,
        sink: Arc<dyn ReportingSink>,
        timings: MonitorTimings,
        default_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            service,
            sink,
            timings,
            default_env,
        }
    }

    /// Run `item` to completion and report its outcome.
    pub async fn run(&self, item: &TestItem) -> RunResult {
        let span = info_span!("monitor", test = %item.test_name);
        self.run_to_result(item).instrument(span).await
    }

    async fn run_to_result(&self, item: &TestItem) -> RunResult {
        self.report(&TestUpdate::running(&item.test_name)).await;

        let mut handle = None;
        let judgment = match self.drive(item, &mut handle).await {
            Ok(judgment) => judgment,
            Err(failure) => Judgment::Failed(failure),
        };

        enter(MonitorState::Reporting);
        let mut result = match &judgment {
            Judgment::Passed => {
                info!("test passed");
                RunResult::passed(&item.test_name)
            }
            Judgment::Failed(failure) => {
                warn!(error = %failure, "test failed");
                let mut result = RunResult::failed(&item.test_name, failure.to_string());
                if failure.wants_log()
                    && let Some(job_id) = handle.as_ref().and_then(|h| h.job_id.as_deref())
                {
                    result.log = self.download_log(job_id).await;
                }
                result
            }
        };
        result.build_duration = handle.as_ref().map(BuildHandle::build_duration);

        self.report(&TestUpdate::finished(&result)).await;
        enter(MonitorState::Done);
        result
    }

    /// Submit the build and poll it to a verdict. Errors are local failures
    /// that end the run without a remote verdict.
    async fn drive(
        &self,
        item: &TestItem,
        handle: &mut Option<BuildHandle>,
    ) -> Result<Judgment, MonitorFailure> {
        enter(MonitorState::Submitting);
        let request = NewBuildRequest::for_item(item, &self.default_env);
        let build = self
            .service
            .submit_build(&request)
            .await
            .map_err(MonitorFailure::Submit)?;
        info!(build = %build.version, "build started");

        let handle = handle.insert(BuildHandle::new(build.version, Instant::now()));
        enter(MonitorState::Polling);
        self.poll(item, handle).await
    }

    async fn poll(
        &self,
        item: &TestItem,
        handle: &mut BuildHandle,
    ) -> Result<Judgment, MonitorFailure> {
        let limits = PhaseLimits::for_item(item, &self.timings);

        loop {
            sleep(self.timings.poll_interval).await;

            let details = self
                .service
                .get_build(&item.account_name, &item.project_slug, &handle.version)
                .await
                .map_err(MonitorFailure::Poll)?;
            let job = details.first_job().ok_or_else(|| MonitorFailure::NoJobs {
                version: handle.version.clone(),
            })?;

            let now = Instant::now();
            info!(
                elapsed = %format_elapsed(handle.phase_elapsed(now)),
                status = %job.status,
                "build status"
            );

            match handle.observe(job, now, limits, item.should_succeed) {
                PollStep::Continue => {}
                PollStep::TimedOut(failure) => {
                    if let Some(state) = failure.state() {
                        enter(state);
                    }
                    warn!(error = %failure, "build timed out");
                    self.cancel(item, handle).await;
                    return Ok(Judgment::Failed(failure));
                }
                PollStep::Finished(judgment) => {
                    match &judgment {
                        Judgment::Passed => enter(match job.status {
                            BuildStatus::Failed => MonitorState::RemoteFailed,
                            _ => MonitorState::RemoteSucceeded,
                        }),
                        Judgment::Failed(failure) => {
                            if let Some(state) = failure.state() {
                                enter(state);
                            }
                        }
                    }
                    if job.status == BuildStatus::Success {
                        info!(
                            duration = %format_elapsed(handle.build_duration()),
                            "build duration"
                        );
                    }
                    return Ok(judgment);
                }
            }
        }
    }

    /// Ask the service to cancel the build, then check it actually stopped.
    /// Failures here are logged only; the verdict is already decided.
    async fn cancel(&self, item: &TestItem, handle: &BuildHandle) {
        info!(build = %handle.version, "cancelling build");
        if let Err(e) = self
            .service
            .cancel_build(&item.account_name, &item.project_slug, &handle.version)
            .await
        {
            warn!(build = %handle.version, error = %e, "error cancelling build");
            return;
        }

        sleep(self.timings.cancel_grace).await;

        match self
            .service
            .get_build(&item.account_name, &item.project_slug, &handle.version)
            .await
        {
            Ok(details) if details.status == BuildStatus::Cancelling => {
                warn!(build = %handle.version, "build has stuck in cancelling state");
            }
            Ok(details) => {
                debug!(build = %handle.version, status = %details.status, "build status after cancel");
            }
            Err(e) => {
                warn!(build = %handle.version, error = %e, "cannot check build after cancel");
            }
        }
    }

    async fn download_log(&self, job_id: &str) -> Option<String> {
        match self.service.fetch_job_log(job_id).await {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(job = job_id, error = %e, "cannot download build log");
                None
            }
        }
    }

    async fn report(&self, update: &TestUpdate) {
        if let Err(e) = self.sink.test_outcome(update).await {
            warn!(outcome = %update.outcome, error = %e, "cannot report test status");
        }
    }
}

fn enter(state: MonitorState) {
    debug!(state = %state, "monitor state");
}
