//! Shared types and utilities for the deployment E2E runner.
//!
//! Everything here is free of provisioning side effects: run identity,
//! target descriptors, connection info, the error taxonomy, configuration
//! parsing, logging setup and test logging helpers.

pub mod config;
pub mod errors;
pub mod logging;
pub mod run_id;
pub mod testing;
pub mod types;
pub mod util;

pub use config::{ConfigSource, EnvError, EnvParser, RunnerConfig, Sourced};
pub use errors::{ProvisionError, ValidationError};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use run_id::{RunId, resolve_run_id};
pub use types::{
    AppEngineFlexTarget, AppEngineStandardTarget, ConnectionInfo, FunctionTarget, ImageTarget,
    LocalTarget, TargetDescriptor, TargetKind,
};
pub use util::{mask_sensitive_command, render_command};
