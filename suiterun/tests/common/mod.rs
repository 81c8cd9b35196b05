#![allow(dead_code)]

pub mod logging;
pub mod service;
pub mod sink;

#[allow(unused_imports)]
pub use logging::init_test_logging;
#[allow(unused_imports)]
pub use service::{BuildScript, ScriptedBuildService};
#[allow(unused_imports)]
pub use sink::{FailingSink, RecordingSink, SinkEvent};

use std::time::Duration;

pub const SECOND: Duration = Duration::from_secs(1);
pub const MINUTE: Duration = Duration::from_secs(60);
