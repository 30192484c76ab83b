//! Configuration for the runner.
//!
//! Precedence, lowest first: built-in defaults, the config file, `E2E_*`
//! environment variables, command-line flags.

pub mod env;
pub mod runner;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use runner::{
    DockerConfig, HEALTH_TIMEOUT_SECS_RANGE, HealthSettings, POLL_INTERVAL_MS_RANGE,
    REQUEST_TIMEOUT_MS_RANGE, RunnerConfig, TerraformConfig, default_config_path,
};
pub use source::{ConfigSource, Sourced};
