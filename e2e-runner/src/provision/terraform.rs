//! Terraform CLI backend.
//!
//! Each run gets its own workspace named after the run id. The workspace is
//! chosen per command through `TF_WORKSPACE`, so runs sharing a module
//! directory never race on the `.terraform/environment` selection.

use super::process::{CommandError, Invocation};
use super::{InfraBackend, Outputs, StackRef, Variables, DEFAULT_WORKSPACE};
use anyhow::Context;
use async_trait::async_trait;
use e2e_common::ProvisionError;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WORKSPACE_ENV: &str = "TF_WORKSPACE";

#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn invocation(&self, dir: &Path, workspace: &str) -> Invocation {
        Invocation::new(&self.binary)
            .arg(format!("-chdir={}", dir.display()))
            .env(WORKSPACE_ENV, workspace)
    }

    fn var_args(vars: &Variables) -> Vec<String> {
        vars.iter()
            .flat_map(|(key, value)| ["-var".to_string(), format!("{key}={value}")])
            .collect()
    }

    async fn init(&self, cancel: &CancellationToken, dir: &Path) -> Result<(), CommandError> {
        // `init` must see an existing workspace, so it runs against default.
        self.invocation(dir, DEFAULT_WORKSPACE)
            .args(["init", "-input=false", "-no-color"])
            .output(cancel)
            .await?;
        Ok(())
    }

    async fn create_workspace(
        &self,
        cancel: &CancellationToken,
        stack: &StackRef,
    ) -> Result<(), CommandError> {
        if stack.is_default_workspace() {
            return Ok(());
        }
        let result = self
            .invocation(&stack.dir, DEFAULT_WORKSPACE)
            .args(["workspace", "new", "-no-color", stack.workspace.as_str()])
            .output(cancel)
            .await;
        match result {
            Err(err) if err.stderr().contains("already exists") => {
                debug!("Terraform workspace '{}' already exists", stack.workspace);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn delete_workspace(&self, stack: &StackRef) -> anyhow::Result<()> {
        if stack.is_default_workspace() {
            return Ok(());
        }
        self.invocation(&stack.dir, DEFAULT_WORKSPACE)
            .args(["workspace", "delete", "-no-color", stack.workspace.as_str()])
            .output(&CancellationToken::new())
            .await
            .with_context(|| format!("failed to delete terraform workspace '{}'", stack.workspace))?;
        Ok(())
    }

    async fn outputs(
        &self,
        cancel: &CancellationToken,
        stack: &StackRef,
    ) -> Result<Outputs, ProvisionError> {
        const STEP: &str = "terraform output";
        let out = self
            .invocation(&stack.dir, &stack.workspace)
            .args(["output", "-json", "-no-color"])
            .output(cancel)
            .await
            .map_err(|e| provision_error(stack, STEP, e))?;
        Outputs::from_terraform_json(&out.stdout)
            .map_err(|e| ProvisionError::new(stack.target, STEP, e))
    }

    /// Apply the shared resources in `dir` in the default workspace.
    ///
    /// Without `auto_approve` Terraform prompts on the caller's terminal.
    pub async fn apply_persistent(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        vars: &Variables,
        auto_approve: bool,
    ) -> anyhow::Result<()> {
        self.init(cancel, dir)
            .await
            .with_context(|| format!("terraform init failed in {}", dir.display()))?;

        let mut apply = self
            .invocation(dir, DEFAULT_WORKSPACE)
            .args(["apply", "-input=true"])
            .args(Self::var_args(vars));
        if auto_approve {
            apply = apply.arg("-auto-approve");
        }
        info!("Applying persistent resources in {}", dir.display());
        apply
            .interactive(cancel)
            .await
            .with_context(|| format!("terraform apply failed in {}", dir.display()))?;
        Ok(())
    }
}

fn provision_error(stack: &StackRef, step: &str, err: CommandError) -> ProvisionError {
    if err.is_canceled() {
        ProvisionError::canceled(stack.target, step)
    } else {
        ProvisionError::new(stack.target, step, err)
    }
}

#[async_trait]
impl InfraBackend for TerraformCli {
    async fn apply(
        &self,
        cancel: &CancellationToken,
        stack: &StackRef,
        vars: &Variables,
    ) -> Result<Outputs, ProvisionError> {
        info!(
            target = %stack.target,
            workspace = %stack.workspace,
            "Applying {}",
            stack.dir.display()
        );
        self.init(cancel, &stack.dir)
            .await
            .map_err(|e| provision_error(stack, "terraform init", e))?;
        self.create_workspace(cancel, stack)
            .await
            .map_err(|e| provision_error(stack, "terraform workspace new", e))?;
        self.invocation(&stack.dir, &stack.workspace)
            .args(["apply", "-input=false", "-auto-approve", "-no-color"])
            .args(Self::var_args(vars))
            .output(cancel)
            .await
            .map_err(|e| provision_error(stack, "terraform apply", e))?;
        self.outputs(cancel, stack).await
    }

    async fn destroy(&self, stack: &StackRef, vars: &Variables) -> anyhow::Result<()> {
        info!(
            target = %stack.target,
            workspace = %stack.workspace,
            "Destroying {}",
            stack.dir.display()
        );
        let never = CancellationToken::new();
        self.invocation(&stack.dir, &stack.workspace)
            .args(["destroy", "-input=false", "-auto-approve", "-no-color"])
            .args(Self::var_args(vars))
            .output(&never)
            .await
            .with_context(|| {
                format!(
                    "terraform destroy failed for workspace '{}' in {}",
                    stack.workspace,
                    stack.dir.display()
                )
            })?;
        if let Err(err) = self.delete_workspace(stack).await {
            // Resources are gone; a leftover empty workspace is harmless.
            warn!("{:#}", err);
        }
        Ok(())
    }
}
