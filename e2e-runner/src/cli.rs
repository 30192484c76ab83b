//! Command-line interface of the `e2e-runner` binary.

use crate::cleanup::CleanupReport;
use crate::harness::HarnessOutcome;
use crate::orchestrator::SetupError;
use clap::{Args, Parser, Subcommand};
use e2e_common::config::HEALTH_TIMEOUT_SECS_RANGE;
use e2e_common::types::DEFAULT_LOCAL_PORT;
use e2e_common::{
    AppEngineFlexTarget, AppEngineStandardTarget, FunctionTarget, ImageTarget, LocalTarget,
    TargetDescriptor,
};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
/// Tests passed but some resources could not be released.
pub const EXIT_CLEANUP_FAILED: i32 = 3;
pub const EXIT_CANCELED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "e2e-runner")]
#[command(
    author,
    version,
    about = "Deploy an instrumented test server, wait for it to become healthy, run the tests and tear everything down"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project that owns every provisioned resource
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: String,

    /// How long to wait for the test server health check (e.g. 5m).
    /// Defaults to `[health] timeout_secs`, 2m unless configured.
    #[arg(long, value_parser = parse_health_timeout)]
    pub health_check_timeout: Option<Duration>,

    /// Identifier used to name the Terraform workspace and cloud resources.
    /// Pass the CI build id to make leftovers traceable; generated otherwise.
    #[arg(long, env = "TEST_RUN_ID")]
    pub test_run_id: Option<String>,

    /// Runner config file (default: <config dir>/e2e-runner/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the per-target Terraform modules
    #[arg(long)]
    pub tf_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Command run once the server is healthy, given after `--`.
#[derive(Args, Debug, Clone, Default)]
pub struct TestCommand {
    /// Test command; without one the run only verifies the deployment
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Container image of the test server
    #[arg(long)]
    pub image: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the resources in tf/persistent and exit (does not run tests)
    ApplyPersistent {
        /// Approve without prompting
        #[arg(long)]
        auto_approve: bool,
    },

    /// Deploy the test server locally with docker and run the tests
    Local {
        #[command(flatten)]
        image: ImageArgs,

        /// Port the server listens on
        #[arg(long, default_value_t = DEFAULT_LOCAL_PORT)]
        port: u16,

        /// Credentials key file mounted into the container, for running
        /// without a metadata server
        #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
        google_application_credentials: Option<PathBuf>,

        /// Docker network to attach the container to
        #[arg(long)]
        network: Option<String>,

        /// User to run the container as
        #[arg(long)]
        container_user: Option<String>,

        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server on GKE and run the tests
    Gke {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server on GCE and run the tests
    Gce {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server on App Engine flexible and run the tests
    Gae {
        #[command(flatten)]
        image: ImageArgs,

        /// Language runtime of the test server, used in naming the service
        #[arg(long)]
        runtime: String,

        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server on App Engine standard and run the tests
    GaeStandard {
        /// Language runtime of the test server, used in naming the service
        #[arg(long)]
        runtime: String,

        /// Absolute path of the zip file with the application source
        #[arg(long)]
        app_source: PathBuf,

        /// Optional command App Engine uses to start the application
        #[arg(long)]
        entrypoint: Option<String>,

        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server on Cloud Run and run the tests
    CloudRun {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        tests: TestCommand,
    },

    /// Deploy the test server as a Cloud Function (2nd gen) and run the tests
    CloudFunctionsGen2 {
        /// Language runtime of the function
        #[arg(long)]
        runtime: String,

        /// Function entry point
        #[arg(long)]
        entry_point: String,

        /// Absolute path of the zip file with the function source
        #[arg(long)]
        function_source: PathBuf,

        #[command(flatten)]
        tests: TestCommand,
    },
}

impl Commands {
    /// Target and test command of a deployment subcommand.
    pub fn deployment(&self) -> Option<(TargetDescriptor, &[String])> {
        let (descriptor, tests) = match self {
            Self::ApplyPersistent { .. } => return None,
            Self::Local {
                image,
                port,
                google_application_credentials,
                network,
                container_user,
                tests,
            } => (
                TargetDescriptor::Local(LocalTarget {
                    image: image.image.clone(),
                    port: *port,
                    credentials_path: google_application_credentials.clone(),
                    network: network.clone(),
                    container_user: container_user.clone(),
                }),
                tests,
            ),
            Self::Gke { image, tests } => (
                TargetDescriptor::ManagedCluster(ImageTarget {
                    image: image.image.clone(),
                }),
                tests,
            ),
            Self::Gce { image, tests } => (
                TargetDescriptor::ManagedVm(ImageTarget {
                    image: image.image.clone(),
                }),
                tests,
            ),
            Self::Gae {
                image,
                runtime,
                tests,
            } => (
                TargetDescriptor::AppEngineFlex(AppEngineFlexTarget {
                    image: image.image.clone(),
                    runtime: runtime.clone(),
                }),
                tests,
            ),
            Self::GaeStandard {
                runtime,
                app_source,
                entrypoint,
                tests,
            } => (
                TargetDescriptor::AppEngineStandard(AppEngineStandardTarget {
                    runtime: runtime.clone(),
                    app_source: app_source.clone(),
                    entrypoint: entrypoint.clone(),
                }),
                tests,
            ),
            Self::CloudRun { image, tests } => (
                TargetDescriptor::ServerlessContainer(ImageTarget {
                    image: image.image.clone(),
                }),
                tests,
            ),
            Self::CloudFunctionsGen2 {
                runtime,
                entry_point,
                function_source,
                tests,
            } => (
                TargetDescriptor::ServerlessFunction(FunctionTarget {
                    runtime: runtime.clone(),
                    entry_point: entry_point.clone(),
                    source: function_source.clone(),
                }),
                tests,
            ),
        };
        Some((descriptor, tests.command.as_slice()))
    }
}

/// Humantime duration within [`HEALTH_TIMEOUT_SECS_RANGE`].
fn parse_health_timeout(value: &str) -> Result<Duration, String> {
    let timeout = humantime::parse_duration(value).map_err(|e| e.to_string())?;
    let min = Duration::from_secs(*HEALTH_TIMEOUT_SECS_RANGE.start());
    let max = Duration::from_secs(*HEALTH_TIMEOUT_SECS_RANGE.end());
    if timeout < min || timeout > max {
        return Err(format!(
            "must be between {} and {}",
            humantime::format_duration(min),
            humantime::format_duration(max)
        ));
    }
    Ok(timeout)
}

/// Process exit code for a finished run.
///
/// Setup and test failures win over cleanup failures; a cleanup failure only
/// changes the code of an otherwise successful run.
pub fn exit_code(
    result: &Result<anyhow::Result<HarnessOutcome>, SetupError>,
    cleanup: &CleanupReport,
) -> i32 {
    match result {
        Err(err) if err.is_canceled() => EXIT_CANCELED,
        Err(_) | Ok(Err(_)) => EXIT_FAILURE,
        Ok(Ok(HarnessOutcome::Canceled)) => EXIT_CANCELED,
        Ok(Ok(HarnessOutcome::Failed(_))) => EXIT_FAILURE,
        Ok(Ok(HarnessOutcome::Passed)) if !cleanup.is_clean() => EXIT_CLEANUP_FAILED,
        Ok(Ok(HarnessOutcome::Passed)) => EXIT_OK,
    }
}
