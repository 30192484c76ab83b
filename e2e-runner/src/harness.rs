//! Runs the external test command against a connected client.

use crate::client::TestClient;
use anyhow::{Context, Result, bail};
use e2e_common::render_command;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the test command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessOutcome {
    Passed,
    /// Non-zero exit; `None` when terminated by a signal.
    Failed(Option<i32>),
    /// Killed after cancellation.
    Canceled,
}

impl HarnessOutcome {
    pub fn is_success(self) -> bool {
        self == Self::Passed
    }
}

/// The test command, given as a program and its arguments.
#[derive(Debug, Clone)]
pub struct TestHarness {
    program: String,
    args: Vec<String>,
}

impl TestHarness {
    pub fn new(command: &[String]) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("test command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn display(&self) -> String {
        render_command(&self.program, &self.args)
    }

    /// Run the command with the client's environment and the caller's stdio.
    pub async fn run(&self, cancel: &CancellationToken, client: &TestClient) -> Result<HarnessOutcome> {
        info!(run_id = %client.run_id(), "Running tests: {}", self.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(client.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start test command `{}`", self.display()))?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!("Canceled; stopping test command");
                let _ = child.kill().await;
                Ok(HarnessOutcome::Canceled)
            }
            status = child.wait() => {
                let status = status.context("failed waiting for test command")?;
                if status.success() {
                    info!("Tests passed");
                    Ok(HarnessOutcome::Passed)
                } else {
                    warn!("Tests failed: {}", status);
                    Ok(HarnessOutcome::Failed(status.code()))
                }
            }
        }
    }
}
