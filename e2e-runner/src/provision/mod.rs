//! Provisioning backends behind one contract.
//!
//! Every [`Provisioner`] returns a [`Provisioned`] that always carries a
//! cleanup handle, including when the result is an error: release actions are
//! registered before the step that may create a resource starts.

pub mod cloud;
pub mod docker;
pub mod local;
mod process;
pub mod terraform;

pub use cloud::CloudProvisioner;
pub use docker::DockerCli;
pub use local::LocalProvisioner;
pub use terraform::TerraformCli;

use crate::cleanup::CleanupHandle;
use async_trait::async_trait;
use e2e_common::{ConnectionInfo, ProvisionError, RunId, TargetDescriptor, TargetKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// IaC variables passed as `-var key=value`.
pub type Variables = BTreeMap<String, String>;

/// Terraform output holding the server's base URL.
pub const ENDPOINT_OUTPUT: &str = "endpoint";

/// Workspace used by resources shared across runs.
pub const DEFAULT_WORKSPACE: &str = "default";

/// What a provisioner hands back: a cleanup handle and the connection result.
#[derive(Debug)]
pub struct Provisioned {
    pub cleanup: CleanupHandle,
    pub result: Result<ConnectionInfo, ProvisionError>,
}

impl Provisioned {
    pub fn ready(cleanup: CleanupHandle, info: ConnectionInfo) -> Self {
        Self {
            cleanup,
            result: Ok(info),
        }
    }

    pub fn failed(cleanup: CleanupHandle, err: ProvisionError) -> Self {
        Self {
            cleanup,
            result: Err(err),
        }
    }
}

/// Deploys the test server for one or more target kinds.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Target kinds this provisioner can deploy.
    fn kinds(&self) -> Vec<TargetKind>;

    async fn provision(
        &self,
        cancel: &CancellationToken,
        run_id: &RunId,
        target: &TargetDescriptor,
    ) -> Provisioned;
}

/// An IaC module directory applied in one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRef {
    pub target: TargetKind,
    pub dir: PathBuf,
    pub workspace: String,
}

impl StackRef {
    pub fn for_run(target: TargetKind, tf_root: &std::path::Path, run_id: &RunId) -> Self {
        Self {
            target,
            dir: tf_root.join(target.tf_dir()),
            workspace: run_id.to_string(),
        }
    }

    pub fn is_default_workspace(&self) -> bool {
        self.workspace == DEFAULT_WORKSPACE
    }
}

/// The infrastructure-as-code tool.
#[async_trait]
pub trait InfraBackend: Send + Sync {
    /// Create or update the stack and return its outputs. Never retried.
    async fn apply(
        &self,
        cancel: &CancellationToken,
        stack: &StackRef,
        vars: &Variables,
    ) -> Result<Outputs, ProvisionError>;

    /// Destroy everything in the stack's workspace, then drop the workspace.
    async fn destroy(&self, stack: &StackRef, vars: &Variables) -> anyhow::Result<()>;
}

/// A container to start for the local target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub port: u16,
    pub env: Vec<(String, String)>,
    /// Host path mounted read-only at the given container path.
    pub mounts: Vec<(PathBuf, String)>,
    pub network: Option<String>,
    pub user: Option<String>,
}

/// The container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start the container detached and return its id.
    async fn run(&self, cancel: &CancellationToken, spec: &ContainerSpec)
    -> Result<String, ProvisionError>;

    /// Force-remove the container. A missing container is not an error.
    async fn remove(&self, name: &str) -> anyhow::Result<()>;
}

#[derive(Deserialize)]
struct RawOutput {
    value: serde_json::Value,
    #[serde(default)]
    sensitive: bool,
}

/// Outputs of an applied stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    values: BTreeMap<String, serde_json::Value>,
    sensitive: Vec<String>,
}

impl Outputs {
    /// Parse `terraform output -json`.
    pub fn from_terraform_json(json: &str) -> Result<Self, serde_json::Error> {
        let trimmed = json.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let raw: BTreeMap<String, RawOutput> = serde_json::from_str(trimmed)?;
        let mut outputs = Self::default();
        for (name, output) in raw {
            if output.sensitive {
                outputs.sensitive.push(name.clone());
            }
            outputs.values.insert(name, output.value);
        }
        Ok(outputs)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(serde_json::Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.iter().any(|s| s == name)
    }

    /// String outputs other than the endpoint.
    pub fn channels(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(name, _)| name.as_str() != ENDPOINT_OUTPUT)
            .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
            .collect()
    }

    /// Build connection info from the `endpoint` output plus the channels.
    pub fn into_connection_info(self, target: TargetKind) -> Result<ConnectionInfo, ProvisionError> {
        let endpoint = self.get_str(ENDPOINT_OUTPUT).ok_or_else(|| {
            ProvisionError::new(
                target,
                "read outputs",
                format!("stack produced no string output named `{ENDPOINT_OUTPUT}`"),
            )
        })?;
        Ok(self
            .channels()
            .into_iter()
            .fold(ConnectionInfo::new(endpoint), |info, (name, value)| {
                info.with_channel(name, value)
            }))
    }
}

/// Variables every stack receives.
pub(crate) fn run_variables(project_id: &str, run_id: &RunId) -> Variables {
    let mut vars = Variables::new();
    vars.insert("project_id".to_string(), project_id.to_string());
    vars.insert("test_run_id".to_string(), run_id.to_string());
    vars
}
