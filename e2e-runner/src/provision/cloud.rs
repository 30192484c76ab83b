//! Provisioner for every target deployed purely through an IaC stack.

use super::{InfraBackend, Provisioned, Provisioner, StackRef, run_variables};
use crate::cleanup::CleanupHandle;
use async_trait::async_trait;
use e2e_common::{ProvisionError, RunId, TargetDescriptor, TargetKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Targets served by [`CloudProvisioner`].
pub const CLOUD_KINDS: [TargetKind; 6] = [
    TargetKind::ManagedCluster,
    TargetKind::ManagedVm,
    TargetKind::AppEngineFlex,
    TargetKind::AppEngineStandard,
    TargetKind::ServerlessContainer,
    TargetKind::ServerlessFunction,
];

/// Applies `<tf_root>/<kind>` in the run's workspace and reads the endpoint
/// from the stack outputs.
pub struct CloudProvisioner {
    backend: Arc<dyn InfraBackend>,
    tf_root: PathBuf,
    project_id: String,
}

impl CloudProvisioner {
    pub fn new(
        backend: Arc<dyn InfraBackend>,
        tf_root: impl Into<PathBuf>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            tf_root: tf_root.into(),
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl Provisioner for CloudProvisioner {
    fn kinds(&self) -> Vec<TargetKind> {
        CLOUD_KINDS.to_vec()
    }

    async fn provision(
        &self,
        cancel: &CancellationToken,
        run_id: &RunId,
        target: &TargetDescriptor,
    ) -> Provisioned {
        let kind = target.kind();
        if kind == TargetKind::Local {
            return Provisioned::failed(
                CleanupHandle::noop(),
                ProvisionError::new(kind, "dispatch", "local target needs the local provisioner"),
            );
        }

        let stack = StackRef::for_run(kind, &self.tf_root, run_id);
        let mut vars = run_variables(&self.project_id, run_id);
        vars.extend(target.variables());

        // Registered before apply: a failed apply may leave resources behind.
        let cleanup = {
            let backend = Arc::clone(&self.backend);
            let stack = stack.clone();
            let vars = vars.clone();
            CleanupHandle::new(format!("destroy {} stack {}", kind, stack.workspace), move || async move {
                backend.destroy(&stack, &vars).await
            })
        };

        info!(run_id = %run_id, target = %kind, "Provisioning test server");
        let result = match self.backend.apply(cancel, &stack, &vars).await {
            Ok(outputs) => outputs.into_connection_info(kind),
            Err(err) => Err(err),
        };
        Provisioned { cleanup, result }
    }
}
