//! In-memory build service driven by per-project scripts.
//!
//! A script is a list of `(status, hold)` phases measured from submission on
//! the tokio clock, so tests run under `start_paused` and finish instantly.
//! The last phase holds forever.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use suiterun::{BuildInfo, BuildService, NewBuildRequest, Operation, ServiceError};
use suiterun_common::{BuildDetails, BuildStatus, JobSummary};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct BuildScript {
    pub phases: Vec<(BuildStatus, Duration)>,
    pub submit_error: bool,
    pub submit_panics: bool,
    /// Fail every poll after this many successful ones.
    pub poll_error_after: Option<usize>,
    pub cancel_error: bool,
    pub status_after_cancel: BuildStatus,
    pub no_jobs: bool,
    pub log: Option<String>,
}

impl BuildScript {
    pub fn new(phases: &[(&str, Duration)]) -> Self {
        Self {
            phases: phases
                .iter()
                .map(|(status, hold)| (BuildStatus::from(*status), *hold))
                .collect(),
            submit_error: false,
            submit_panics: false,
            poll_error_after: None,
            cancel_error: false,
            status_after_cancel: BuildStatus::Cancelled,
            no_jobs: false,
            log: Some("build log".to_string()),
        }
    }

    /// A build that sits in one status forever.
    pub fn stuck(status: &str) -> Self {
        Self::new(&[(status, Duration::MAX)])
    }

    pub fn succeeding_after(running: Duration) -> Self {
        Self::new(&[
            ("queued", Duration::from_secs(15)),
            ("running", running),
            ("success", Duration::MAX),
        ])
    }

    pub fn failing_after(running: Duration) -> Self {
        Self::new(&[
            ("queued", Duration::from_secs(15)),
            ("running", running),
            ("failed", Duration::MAX),
        ])
    }

    fn status_at(&self, elapsed: Duration) -> BuildStatus {
        let mut start = Duration::ZERO;
        for (status, hold) in &self.phases {
            let end = start.saturating_add(*hold);
            if elapsed < end {
                return status.clone();
            }
            start = end;
        }
        self.phases
            .last()
            .map(|(status, _)| status.clone())
            .unwrap_or(BuildStatus::Queued)
    }
}

#[derive(Debug)]
struct Build {
    project: String,
    job_id: String,
    submitted_at: Instant,
    polls: usize,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct State {
    next_build: usize,
    builds: HashMap<String, Build>,
    submits: Vec<NewBuildRequest>,
    cancels: Vec<String>,
    log_fetches: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedBuildService {
    scripts: HashMap<String, BuildScript>,
    state: Mutex<State>,
}

impl ScriptedBuildService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the builds of `project`.
    pub fn with_project(mut self, project: &str, script: BuildScript) -> Self {
        self.scripts.insert(project.to_string(), script);
        self
    }

    pub fn submits(&self) -> Vec<NewBuildRequest> {
        self.state.lock().unwrap().submits.clone()
    }

    pub fn submitted_projects(&self) -> Vec<String> {
        self.submits().into_iter().map(|r| r.project_slug).collect()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.state.lock().unwrap().cancels.clone()
    }

    pub fn log_fetches(&self) -> Vec<String> {
        self.state.lock().unwrap().log_fetches.clone()
    }

    fn script(&self, project: &str) -> &BuildScript {
        self.scripts
            .get(project)
            .unwrap_or_else(|| panic!("no script for project {project}"))
    }
}

fn unavailable(operation: Operation) -> ServiceError {
    ServiceError::Status {
        operation,
        status: 503,
        body: "Service Unavailable".to_string(),
    }
}

#[async_trait]
impl BuildService for ScriptedBuildService {
    async fn submit_build(&self, request: &NewBuildRequest) -> Result<BuildInfo, ServiceError> {
        let script = self.script(&request.project_slug);
        if script.submit_panics {
            panic!("submit exploded for {}", request.project_slug);
        }

        let mut state = self.state.lock().unwrap();
        state.submits.push(request.clone());
        if script.submit_error {
            return Err(unavailable(Operation::SubmitBuild));
        }

        state.next_build += 1;
        let n = state.next_build;
        let version = format!("1.0.{n}");
        state.builds.insert(
            version.clone(),
            Build {
                project: request.project_slug.clone(),
                job_id: format!("job-{n}"),
                submitted_at: Instant::now(),
                polls: 0,
                cancelled: false,
            },
        );
        Ok(BuildInfo { version })
    }

    async fn get_build(
        &self,
        _account: &str,
        project: &str,
        version: &str,
    ) -> Result<BuildDetails, ServiceError> {
        let script = self.script(project);
        let mut state = self.state.lock().unwrap();
        let build = state
            .builds
            .get_mut(version)
            .ok_or_else(|| unavailable(Operation::GetBuild))?;
        assert_eq!(build.project, project);

        if script
            .poll_error_after
            .is_some_and(|limit| build.polls >= limit)
        {
            return Err(unavailable(Operation::GetBuild));
        }
        build.polls += 1;

        let status = if build.cancelled {
            script.status_after_cancel.clone()
        } else {
            script.status_at(build.submitted_at.elapsed())
        };
        let jobs = if script.no_jobs {
            Vec::new()
        } else {
            vec![JobSummary::new(build.job_id.clone(), status.clone())]
        };
        Ok(BuildDetails {
            version: version.to_string(),
            status,
            jobs,
        })
    }

    async fn cancel_build(
        &self,
        _account: &str,
        project: &str,
        version: &str,
    ) -> Result<(), ServiceError> {
        let script = self.script(project);
        let mut state = self.state.lock().unwrap();
        state.cancels.push(version.to_string());
        if script.cancel_error {
            return Err(unavailable(Operation::CancelBuild));
        }
        if let Some(build) = state.builds.get_mut(version) {
            build.cancelled = true;
        }
        Ok(())
    }

    async fn fetch_job_log(&self, job_id: &str) -> Result<String, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.log_fetches.push(job_id.to_string());
        let project = state
            .builds
            .values()
            .find(|b| b.job_id == job_id)
            .map(|b| b.project.clone())
            .ok_or_else(|| unavailable(Operation::FetchLog))?;
        drop(state);

        self.script(&project)
            .log
            .clone()
            .ok_or_else(|| unavailable(Operation::FetchLog))
    }
}
