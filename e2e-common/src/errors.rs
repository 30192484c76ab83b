//! Error taxonomy shared by the runner and its provisioners.
//!
//! | Error              | Raised                      | Cleanup needed |
//! |--------------------|-----------------------------|----------------|
//! | `ValidationError`  | before anything is created  | no             |
//! | `ProvisionError`   | while creating resources    | yes, partial   |
//!
//! Health, cancellation and cleanup errors live in the runner crate because
//! only the orchestrator produces them.

use crate::types::TargetKind;
use thiserror::Error;

/// Boxed underlying cause carried by a [`ProvisionError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Malformed or missing input, detected before provisioning starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required target parameter is empty.
    #[error("{target}: required parameter `{field}` is empty")]
    MissingField {
        target: TargetKind,
        field: &'static str,
    },

    /// A target parameter is present but unusable.
    #[error("{target}: parameter `{field}` is invalid: {reason}")]
    InvalidField {
        target: TargetKind,
        field: &'static str,
        reason: String,
    },

    /// The run identifier cannot be used as a workspace or resource name.
    #[error("invalid run id '{value}': {reason}")]
    InvalidRunId { value: String, reason: String },

    /// No project/account identifier was supplied.
    #[error("project id must not be empty")]
    MissingProjectId,

    /// The orchestrator has no provisioner for the selected target.
    #[error("no provisioner registered for target {0}")]
    UnsupportedTarget(TargetKind),
}

/// The backend failed to create resources. Creation may have been partial,
/// so this error is always paired with a cleanup handle.
#[derive(Debug, Error)]
#[error("provisioning {target} failed during {step}: {cause}")]
pub struct ProvisionError {
    target: TargetKind,
    step: String,
    canceled: bool,
    #[source]
    cause: BoxError,
}

impl ProvisionError {
    /// Wrap an underlying cause.
    pub fn new(target: TargetKind, step: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            target,
            step: step.into(),
            canceled: false,
            cause: cause.into(),
        }
    }

    /// The step was abandoned because the run was canceled.
    pub fn canceled(target: TargetKind, step: impl Into<String>) -> Self {
        Self {
            target,
            step: step.into(),
            canceled: true,
            cause: "canceled before completion".into(),
        }
    }

    /// Target whose provisioning failed.
    pub fn target(&self) -> TargetKind {
        self.target
    }

    /// Provisioning step that failed (e.g. `terraform apply`).
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Whether the failure was caused by cancellation.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Underlying cause, for diagnostics.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_provision_error_exposes_cause_as_source() {
        let err = ProvisionError::new(
            TargetKind::ManagedCluster,
            "terraform apply",
            std::io::Error::other("quota exceeded for CPUS"),
        );

        assert_eq!(err.target(), TargetKind::ManagedCluster);
        assert_eq!(err.step(), "terraform apply");
        assert!(!err.is_canceled());
        let source = err.source().expect("source should be set");
        assert!(source.to_string().contains("quota exceeded"));
        assert!(err.to_string().contains("gke"));
    }

    #[test]
    fn test_provision_error_canceled() {
        let err = ProvisionError::canceled(TargetKind::Local, "docker run");
        assert!(err.is_canceled());
        assert!(err.to_string().contains("canceled"));
    }

    #[test]
    fn test_validation_error_messages_name_the_field() {
        let err = ValidationError::MissingField {
            target: TargetKind::AppEngineFlex,
            field: "runtime",
        };
        assert_eq!(err.to_string(), "gae: required parameter `runtime` is empty");
    }
}
