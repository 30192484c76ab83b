//! Docker CLI container engine.

use super::process::{CommandError, Invocation};
use super::{ContainerEngine, ContainerSpec};
use anyhow::Context;
use async_trait::async_trait;
use e2e_common::{ProvisionError, TargetKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MISSING_CONTAINER: &str = "No such container";

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run_invocation(&self, spec: &ContainerSpec) -> Invocation {
        let mut inv = Invocation::new(&self.binary)
            .args(["run", "--detach", "--name", spec.name.as_str()]);
        match &spec.network {
            Some(network) => inv = inv.args(["--network", network.as_str()]),
            None => inv = inv.args(["--publish".to_string(), format!("{0}:{0}", spec.port)]),
        }
        if let Some(user) = &spec.user {
            inv = inv.args(["--user", user.as_str()]);
        }
        for (host, container) in &spec.mounts {
            inv = inv.args([
                "--volume".to_string(),
                format!("{}:{}:ro", host.display(), container),
            ]);
        }
        for (key, value) in &spec.env {
            inv = inv.args(["--env".to_string(), format!("{key}={value}")]);
        }
        inv.arg(spec.image.as_str())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn run(
        &self,
        cancel: &CancellationToken,
        spec: &ContainerSpec,
    ) -> Result<String, ProvisionError> {
        info!(container = %spec.name, "Starting container from {}", spec.image);
        let out = self
            .run_invocation(spec)
            .output(cancel)
            .await
            .map_err(|e| match e {
                CommandError::Canceled { .. } => ProvisionError::canceled(TargetKind::Local, "docker run"),
                other => ProvisionError::new(TargetKind::Local, "docker run", other),
            })?;
        let id = out.stdout.trim().to_string();
        debug!(container = %spec.name, "Container id {}", id);
        Ok(id)
    }

    async fn remove(&self, name: &str) -> anyhow::Result<()> {
        let result = Invocation::new(&self.binary)
            .args(["rm", "--force", name])
            .output(&CancellationToken::new())
            .await;
        match result {
            Ok(_) => {
                info!(container = %name, "Container removed");
                Ok(())
            }
            Err(err) if err.stderr().contains(MISSING_CONTAINER) => {
                debug!(container = %name, "Container already gone");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("failed to remove container {name}")),
        }
    }
}
