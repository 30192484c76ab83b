//! Resources shared by every run, applied once per project.

use crate::provision::{TerraformCli, Variables};
use anyhow::{Result, ensure};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Module directory, relative to the IaC root.
pub const PERSISTENT_DIR: &str = "persistent";

pub fn persistent_dir(tf_root: &Path) -> PathBuf {
    tf_root.join(PERSISTENT_DIR)
}

fn persistent_variables(project_id: &str) -> Variables {
    let mut vars = Variables::new();
    vars.insert("project_id".to_string(), project_id.to_string());
    vars
}

/// Apply `<tf_root>/persistent` in the default workspace.
pub async fn apply_persistent(
    cancel: &CancellationToken,
    terraform: &TerraformCli,
    tf_root: &Path,
    project_id: &str,
    auto_approve: bool,
) -> Result<()> {
    ensure!(!project_id.trim().is_empty(), "project id must not be empty");
    let dir = persistent_dir(tf_root);
    ensure!(dir.is_dir(), "persistent module not found at {}", dir.display());
    terraform
        .apply_persistent(cancel, &dir, &persistent_variables(project_id), auto_approve)
        .await
}
