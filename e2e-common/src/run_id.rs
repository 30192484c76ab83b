//! Run identity: the label that namespaces every resource of one invocation.
//!
//! The id becomes a Terraform workspace name and a fragment of cloud
//! resource names, so it is restricted to what the least permissive target
//! accepts: lowercase letters, digits and inner hyphens.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Longest accepted run id. A CI build UUID (36 chars) must fit.
pub const MAX_RUN_ID_LEN: usize = 36;

/// Length of generated run ids.
pub const GENERATED_RUN_ID_LEN: usize = 16;

/// Identifier of one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Validate an externally supplied run id.
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if let Some(reason) = invalid_reason(&value) {
            return Err(ValidationError::InvalidRunId { value, reason });
        }
        Ok(Self(value))
    }

    /// Generate a fresh random id of [`GENERATED_RUN_ID_LEN`] hex characters.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(hex[..GENERATED_RUN_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource name derived from this run, e.g. `e2e-<id>` for a container.
    pub fn resource_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

fn invalid_reason(value: &str) -> Option<String> {
    if value.is_empty() {
        return Some("must not be empty".to_string());
    }
    if value.len() > MAX_RUN_ID_LEN {
        return Some(format!("longer than {MAX_RUN_ID_LEN} characters"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Some(format!("character '{c}' is not allowed (use a-z, 0-9, '-')"));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Some("must not start or end with '-'".to_string());
    }
    None
}

/// Use the override verbatim when it is well-formed, otherwise generate.
///
/// Malformed overrides are expected to be rejected by argument validation
/// before this point; if one slips through it is logged and replaced.
pub fn resolve_run_id(external_override: Option<&str>) -> RunId {
    match external_override {
        Some(value) if !value.is_empty() => match RunId::parse(value) {
            Ok(id) => id,
            Err(err) => {
                let generated = RunId::generate();
                warn!("Ignoring run id override: {}; using {}", err, generated);
                generated
            }
        },
        _ => RunId::generate(),
    }
}
