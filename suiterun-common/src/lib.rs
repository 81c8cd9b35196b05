//! Shared types, configuration and logging for suiterun.

#![forbid(unsafe_code)]

pub mod config;
pub mod logging;
pub mod types;

pub use config::{
    ConfigError, ConfigSource, EnvError, EnvParser, MonitorTimings, ReportingConfig,
    RunnerConfig, ServiceConfig, Sourced,
};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use types::{
    BuildDetails, BuildStatus, JobSummary, Outcome, RunResult, TestItem, TestOutcome,
};
