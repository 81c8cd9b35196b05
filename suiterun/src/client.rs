//! Build service client.
//!
//! [`BuildService`] is the contract the monitors depend on; [`HttpBuildService`]
//! implements it against the AppVeyor REST API.

use crate::error::{Operation, ServiceError, truncate_body};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use suiterun_common::{BuildDetails, ServiceConfig, TestItem};
use tracing::debug;

/// Body of a build submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBuildRequest {
    pub account_name: String,
    pub project_slug: String,
    pub branch: String,
    pub environment_variables: BTreeMap<String, String>,
}

impl NewBuildRequest {
    /// Request for `item`, with its own variables laid over `defaults`.
    pub fn for_item(item: &TestItem, defaults: &BTreeMap<String, String>) -> Self {
        let mut environment_variables = defaults.clone();
        environment_variables.extend(
            item.environment_variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            account_name: item.account_name.clone(),
            project_slug: item.project_slug.clone(),
            branch: item.branch.clone(),
            environment_variables,
        }
    }
}

/// The part of a submission response the runner cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildInfo {
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct BuildEnvelope {
    build: BuildDetails,
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn submit_build(&self, request: &NewBuildRequest) -> Result<BuildInfo, ServiceError>;

    async fn get_build(
        &self,
        account: &str,
        project: &str,
        version: &str,
    ) -> Result<BuildDetails, ServiceError>;

    async fn cancel_build(
        &self,
        account: &str,
        project: &str,
        version: &str,
    ) -> Result<(), ServiceError>;

    async fn fetch_job_log(&self, job_id: &str) -> Result<String, ServiceError>;
}

/// AppVeyor REST client.
#[derive(Debug, Clone)]
pub struct HttpBuildService {
    client: Client,
    base_url: Url,
    api_token: String,
    request_timeout: Duration,
}

impl HttpBuildService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let base_url = parse_base_url(&config.base_url.value)?;
        let client = Client::builder()
            .timeout(config.client_timeout)
            .build()
            .map_err(ServiceError::Client)?;
        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.value.clone(),
            request_timeout: config.request_timeout.value,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // parse_base_url rejects URLs that cannot carry a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<Response, ServiceError> {
        let response = request
            .bearer_auth(&self.api_token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| ServiceError::Transport { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BuildService for HttpBuildService {
    async fn submit_build(&self, request: &NewBuildRequest) -> Result<BuildInfo, ServiceError> {
        debug!(
            account = %request.account_name,
            project = %request.project_slug,
            branch = %request.branch,
            "submitting build"
        );
        let operation = Operation::SubmitBuild;
        let response = self
            .send(
                operation,
                self.client
                    .post(self.endpoint(&["api", "builds"]))
                    .json(request),
            )
            .await?;
        response
            .json::<BuildInfo>()
            .await
            .map_err(|e| ServiceError::Decode {
                operation,
                reason: e.to_string(),
            })
    }

    async fn get_build(
        &self,
        account: &str,
        project: &str,
        version: &str,
    ) -> Result<BuildDetails, ServiceError> {
        let operation = Operation::GetBuild;
        let url = self.endpoint(&["api", "projects", account, project, "build", version]);
        let response = self.send(operation, self.client.get(url)).await?;
        response
            .json::<BuildEnvelope>()
            .await
            .map(|envelope| envelope.build)
            .map_err(|e| ServiceError::Decode {
                operation,
                reason: e.to_string(),
            })
    }

    async fn cancel_build(
        &self,
        account: &str,
        project: &str,
        version: &str,
    ) -> Result<(), ServiceError> {
        let url = self.endpoint(&["api", "builds", account, project, version]);
        self.send(Operation::CancelBuild, self.client.delete(url))
            .await?;
        Ok(())
    }

    async fn fetch_job_log(&self, job_id: &str) -> Result<String, ServiceError> {
        let operation = Operation::FetchLog;
        let url = self.endpoint(&["api", "buildjobs", job_id, "log"]);
        let response = self.send(operation, self.client.get(url)).await?;
        response
            .text()
            .await
            .map_err(|source| ServiceError::Transport { operation, source })
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ServiceError> {
    let url = Url::parse(raw).map_err(|e| ServiceError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ServiceError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL cannot carry a path".to_string(),
        });
    }
    Ok(url)
}
