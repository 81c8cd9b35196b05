//! suiterun - integration test runner for remote CI builds
//!
//! Each test case in the suite file is submitted as a build, polled to
//! completion and judged against its expected outcome.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use suiterun::{HttpBuildService, WorkerPool, filter_for_image, load_suite, sink_from_config};
use suiterun_common::{EnvParser, LogConfig, LogFormat, RunnerConfig, init_logging};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "suiterun")]
#[command(author, version, about = "Run integration tests as remote CI builds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Console log format: pretty, compact or json (overrides SUITERUN_LOG_FORMAT)
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Also write JSON logs to this file (overrides SUITERUN_LOG_FILE)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the suite and exit non-zero if any test failed
    Run {
        /// JSON file with the test definitions
        #[arg(short, long)]
        suite: PathBuf,

        /// Only run tests tagged for this image (overrides TEST_SUITE)
        #[arg(short, long)]
        image: Option<String>,

        /// Maximum number of builds in flight (overrides TESTS_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Print the tests that would run
    List {
        /// JSON file with the test definitions
        #[arg(short, long)]
        suite: PathBuf,

        /// Only list tests tagged for this image (overrides TEST_SUITE)
        #[arg(short, long)]
        image: Option<String>,
    },
}

/// Exit code for configuration and suite errors.
const EXIT_SETUP_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("suiterun: {e}");
            return ExitCode::from(EXIT_SETUP_ERROR);
        }
    };

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run {
            suite,
            image,
            concurrency,
        } => run(suite, image, concurrency).await,
        Commands::List { suite, image } => {
            let items = load_suite(&suite)
                .with_context(|| format!("loading suite {}", suite.display()))?;
            let image = image.or_else(|| RunnerConfig::image_filter(&mut EnvParser::new()).value);
            for item in filter_for_image(items, image.as_deref()) {
                let expect = if item.should_succeed { "success" } else { "failure" };
                println!(
                    "{}\t{}/{}@{}\texpect {}",
                    item.test_name, item.account_name, item.project_slug, item.branch, expect
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    suite: PathBuf,
    image: Option<String>,
    concurrency: Option<usize>,
) -> Result<ExitCode> {
    let mut config = RunnerConfig::from_env().context("invalid configuration")?;
    if let Some(n) = concurrency {
        config = config.with_concurrency(n);
    }
    if let Some(image) = image {
        config = config.with_image(image);
    }
    for (name, value, origin) in config.describe() {
        info!(setting = name, value = %value, origin = %origin, "configuration");
    }

    let items = load_suite(&suite).with_context(|| format!("loading suite {}", suite.display()))?;
    let items = filter_for_image(items, config.image.value.as_deref());
    if items.is_empty() {
        info!("no tests to run");
        return Ok(ExitCode::SUCCESS);
    }

    let service = HttpBuildService::new(&config.service).context("creating build service client")?;
    let sink = sink_from_config(&config.reporting).context("creating reporting client")?;

    let pool = WorkerPool::new(&config, Arc::new(service), sink);
    let summary = pool.run(items).await;

    for result in summary.results.iter().filter(|r| r.is_failure()) {
        error!(
            test = %result.test_name,
            error = result.error.as_deref().unwrap_or("unknown"),
            "FAILED"
        );
    }

    if summary.any_failed() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
