//! Local target: auxiliary channels from `tf/local`, server in a container.

use super::{
    ContainerEngine, ContainerSpec, InfraBackend, Provisioned, Provisioner, StackRef,
    run_variables,
};
use crate::cleanup::{CleanupHandle, CleanupStack};
use async_trait::async_trait;
use e2e_common::{ConnectionInfo, LocalTarget, ProvisionError, RunId, TargetDescriptor, TargetKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Where the credentials file is mounted inside the container.
pub const CONTAINER_CREDENTIALS_PATH: &str = "/etc/e2e/credentials.json";

const CONTAINER_PREFIX: &str = "e2e";

pub struct LocalProvisioner {
    backend: Arc<dyn InfraBackend>,
    engine: Arc<dyn ContainerEngine>,
    tf_root: PathBuf,
    project_id: String,
}

impl LocalProvisioner {
    pub fn new(
        backend: Arc<dyn InfraBackend>,
        engine: Arc<dyn ContainerEngine>,
        tf_root: impl Into<PathBuf>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            engine,
            tf_root: tf_root.into(),
            project_id: project_id.into(),
        }
    }

    fn container_spec(
        &self,
        run_id: &RunId,
        target: &LocalTarget,
        channels: &std::collections::BTreeMap<String, String>,
    ) -> ContainerSpec {
        let mut env = vec![
            ("PROJECT_ID".to_string(), self.project_id.clone()),
            ("TEST_RUN_ID".to_string(), run_id.to_string()),
            ("PORT".to_string(), target.port.to_string()),
        ];
        env.extend(channels.iter().map(|(name, value)| (env_key(name), value.clone())));

        let mut mounts = Vec::new();
        if let Some(path) = &target.credentials_path {
            mounts.push((path.clone(), CONTAINER_CREDENTIALS_PATH.to_string()));
            env.push((
                "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
                CONTAINER_CREDENTIALS_PATH.to_string(),
            ));
        }

        ContainerSpec {
            name: run_id.resource_name(CONTAINER_PREFIX),
            image: target.image.clone(),
            port: target.port,
            env,
            mounts,
            network: target.network.clone(),
            user: target.container_user.clone(),
        }
    }
}

/// Container-side endpoint: published on localhost, or reached by container
/// name when sharing a user-defined network.
fn endpoint(spec: &ContainerSpec) -> String {
    match spec.network {
        Some(_) => format!("http://{}:{}", spec.name, spec.port),
        None => format!("http://localhost:{}", spec.port),
    }
}

fn env_key(channel: &str) -> String {
    channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    fn kinds(&self) -> Vec<TargetKind> {
        vec![TargetKind::Local]
    }

    async fn provision(
        &self,
        cancel: &CancellationToken,
        run_id: &RunId,
        target: &TargetDescriptor,
    ) -> Provisioned {
        let TargetDescriptor::Local(local) = target else {
            return Provisioned::failed(
                CleanupHandle::noop(),
                ProvisionError::new(
                    target.kind(),
                    "dispatch",
                    "the local provisioner only deploys the local target",
                ),
            );
        };

        let mut stack = CleanupStack::new();
        let label = format!("local deployment {run_id}");

        let tf_stack = StackRef::for_run(TargetKind::Local, &self.tf_root, run_id);
        let vars = run_variables(&self.project_id, run_id);
        {
            let backend = Arc::clone(&self.backend);
            let tf_stack = tf_stack.clone();
            let vars = vars.clone();
            stack.push(CleanupHandle::new(
                format!("destroy local stack {}", tf_stack.workspace),
                move || async move { backend.destroy(&tf_stack, &vars).await },
            ));
        }

        info!(run_id = %run_id, "Creating local auxiliary channels");
        let outputs = match self.backend.apply(cancel, &tf_stack, &vars).await {
            Ok(outputs) => outputs,
            Err(err) => return Provisioned::failed(stack.into_handle(label), err),
        };
        let channels = outputs.channels();

        let spec = self.container_spec(run_id, local, &channels);
        {
            let engine = Arc::clone(&self.engine);
            let name = spec.name.clone();
            stack.push(CleanupHandle::new(
                format!("remove container {name}"),
                move || async move { engine.remove(&name).await },
            ));
        }

        if let Err(err) = self.engine.run(cancel, &spec).await {
            return Provisioned::failed(stack.into_handle(label), err);
        }

        let info = channels
            .into_iter()
            .fold(ConnectionInfo::new(endpoint(&spec)), |info, (name, value)| {
                info.with_channel(name, value)
            });
        info!(run_id = %run_id, endpoint = %info.endpoint(), "Local test server started");
        Provisioned::ready(stack.into_handle(label), info)
    }
}
