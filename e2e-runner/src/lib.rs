//! Deployment lifecycle runner for instrumented test servers.
//!
//! [`Orchestrator::setup`] provisions the test server on the selected target,
//! waits for it to become healthy and hands back a [`TestClient`] together
//! with the run's [`Cleanup`]. The cleanup tears down everything setup
//! created, exactly once, whether setup succeeded, failed halfway or was
//! canceled.

#![forbid(unsafe_code)]

pub mod cleanup;
pub mod cli;
pub mod client;
pub mod events;
pub mod harness;
pub mod health;
pub mod lifecycle;
pub mod orchestrator;
pub mod persistent;
pub mod provision;

pub use cleanup::{Cleanup, CleanupError, CleanupFailure, CleanupHandle, CleanupReport, CleanupStack};
pub use client::{ClientError, TestClient};
pub use events::{EventBus, RunEvent};
pub use harness::{HarnessOutcome, TestHarness};
pub use health::{HealthConfig, HealthError, HealthProbe, HealthReport, HttpHealthProbe, wait_healthy};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, ScopedRun, SetupError, SetupOutcome, SetupStage,
};
pub use provision::{
    CloudProvisioner, ContainerEngine, ContainerSpec, DockerCli, InfraBackend, LocalProvisioner,
    Outputs, Provisioned, Provisioner, StackRef, TerraformCli,
};
