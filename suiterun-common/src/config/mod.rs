//! Configuration for a suite run.
//!
//! Everything the runner needs from the environment is resolved once into a
//! [`RunnerConfig`] at startup. Components receive the struct by reference;
//! nothing below the CLI reads environment variables on its own.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "https://ci.appveyor.com";
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 256;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RUNNING_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(20);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Build environment variables forwarded from the runner's own environment
/// to every submitted build.
pub const FORWARDED_BUILD_VARIABLES: &[&str] =
    &["APPVEYOR_BUILD_WORKER_CLOUD", "APPVEYOR_BUILD_WORKER_IMAGE"];

/// Selects which image's tests run.
pub const IMAGE_FILTER_VAR: &str = "TEST_SUITE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration:\n{}", format_errors(.0))]
    Invalid(Vec<EnvError>),
}

fn format_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Connection settings for the build service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: Sourced<String>,
    pub api_token: Sourced<String>,
    /// Deadline for a single request.
    pub request_timeout: Sourced<Duration>,
    /// Outer ceiling applied by the HTTP client to every request.
    pub client_timeout: Duration,
}

/// Settings for the test reporting API.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    /// Reporting only happens inside CI and when an API URL is known.
    pub enabled: bool,
    pub api_url: Sourced<Option<String>>,
    /// Framework label shown next to each test on the dashboard.
    pub framework: String,
    pub client_timeout: Duration,
}

/// Timing knobs for build monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    pub poll_interval: Duration,
    pub provisioning_timeout: Duration,
    pub running_timeout: Duration,
    pub cancel_grace: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            provisioning_timeout: DEFAULT_PROVISIONING_TIMEOUT,
            running_timeout: DEFAULT_RUNNING_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Fully resolved configuration for one suite run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub service: ServiceConfig,
    pub reporting: ReportingConfig,
    pub timings: MonitorTimings,
    pub concurrency: Sourced<usize>,
    /// Environment variables every build gets unless the test overrides them.
    pub default_build_env: BTreeMap<String, String>,
    /// Image tag used to filter the suite.
    pub image: Sourced<Option<String>>,
}

impl RunnerConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_parser(&mut EnvParser::new())
    }

    /// Resolve configuration through `parser`, collecting every error.
    pub fn from_parser(parser: &mut EnvParser) -> Result<Self, ConfigError> {
        let base_url = parser.get_string("APPVEYOR_URL", DEFAULT_SERVICE_URL);
        let api_token = parser.get_required_string("APPVEYOR_API_TOKEN");
        let request_timeout = parser.get_duration("TESTS_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT);
        let concurrency = parser.get_usize_range(
            "TESTS_CONCURRENCY",
            DEFAULT_CONCURRENCY,
            1,
            MAX_CONCURRENCY,
        );

        let timings = MonitorTimings {
            poll_interval: parser
                .get_duration("TESTS_POLL_INTERVAL", DEFAULT_POLL_INTERVAL)
                .value,
            provisioning_timeout: parser
                .get_duration("TESTS_PROVISIONING_TIMEOUT", DEFAULT_PROVISIONING_TIMEOUT)
                .value,
            running_timeout: parser
                .get_duration("TESTS_RUNNING_TIMEOUT", DEFAULT_RUNNING_TIMEOUT)
                .value,
            cancel_grace: parser
                .get_duration("TESTS_CANCEL_GRACE", DEFAULT_CANCEL_GRACE)
                .value,
        };

        let mut default_build_env = BTreeMap::new();
        for name in FORWARDED_BUILD_VARIABLES {
            if let Some(value) = parser.get_optional_string(name).value {
                default_build_env.insert((*name).to_string(), value);
            }
        }

        let in_ci = parser.is_set("CI").value;
        let api_url = parser.get_optional_string("APPVEYOR_API_URL");
        let reporting = ReportingConfig {
            enabled: in_ci && api_url.value.is_some(),
            api_url,
            framework: parser.get_string("TESTS_FRAMEWORK_NAME", "AppVeyor").value,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        };

        let image = Self::image_filter(parser);

        if parser.has_errors() {
            return Err(ConfigError::Invalid(parser.take_errors()));
        }

        Ok(Self {
            service: ServiceConfig {
                base_url,
                api_token,
                request_timeout,
                client_timeout: DEFAULT_CLIENT_TIMEOUT,
            },
            reporting,
            timings,
            concurrency,
            default_build_env,
            image,
        })
    }

    /// The image filter on its own, for commands that need nothing else
    /// from the environment.
    pub fn image_filter(parser: &mut EnvParser) -> Sourced<Option<String>> {
        parser.get_optional_string(IMAGE_FILTER_VAR)
    }

    /// Override the pool size from the command line.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Sourced::from_cli(concurrency.clamp(1, MAX_CONCURRENCY));
        self
    }

    /// Override the image filter from the command line.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Sourced::from_cli(Some(image.into()));
        self
    }

    /// Resolved settings as `(name, value, origin)` rows for startup logging.
    /// The API token is never included in clear text.
    pub fn describe(&self) -> Vec<(&'static str, String, String)> {
        let mut rows = vec![
            (
                "service_url",
                self.service.base_url.value.clone(),
                self.service.base_url.origin(),
            ),
            (
                "api_token",
                redact(&self.service.api_token.value),
                self.service.api_token.origin(),
            ),
            (
                "concurrency",
                self.concurrency.value.to_string(),
                self.concurrency.origin(),
            ),
            (
                "image",
                self.image.value.clone().unwrap_or_else(|| "(any)".into()),
                self.image.origin(),
            ),
            (
                "reporting",
                if self.reporting.enabled {
                    self.reporting.api_url.value.clone().unwrap_or_default()
                } else {
                    "disabled".into()
                },
                self.reporting.api_url.origin(),
            ),
        ];
        for (name, value) in &self.default_build_env {
            rows.push(("build_env", format!("{name}={value}"), format!("env:{name}")));
        }
        rows
    }
}

fn redact(token: &str) -> String {
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", token.chars().take(4).collect::<String>())
    }
}
