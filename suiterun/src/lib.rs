//! suiterun: integration tests where every test is a remote CI build.
//!
//! The [`WorkerPool`] runs one [`BuildMonitor`] per test with bounded
//! concurrency. Each monitor submits a build through a [`BuildService`],
//! polls it to a verdict and reports progress to a [`ReportingSink`].

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod reporting;
pub mod suite;
pub mod timing;

pub use client::{BuildInfo, BuildService, HttpBuildService, NewBuildRequest};
pub use error::{Operation, ReportError, ServiceError};
pub use monitor::{
    BuildHandle, BuildMonitor, Judgment, MonitorFailure, MonitorState, PhaseLimits, PollStep,
    judge,
};
pub use pool::{SuiteSummary, WorkerPool};
pub use reporting::{NoopSink, ReportingSink, TestUpdate, WorkerApiSink, sink_from_config};
pub use suite::{SuiteError, filter_for_image, load_suite, parse_suite};
