//! Target descriptors and connection info.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default port the test server listens on when run locally.
pub const DEFAULT_LOCAL_PORT: u16 = 8000;

/// Deployment target selected for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// Local container engine.
    Local,
    /// Managed Kubernetes (GKE).
    ManagedCluster,
    /// Managed VM (GCE).
    ManagedVm,
    /// App Engine flexible environment.
    AppEngineFlex,
    /// App Engine standard environment.
    AppEngineStandard,
    /// Serverless container (Cloud Run).
    ServerlessContainer,
    /// Serverless function (Cloud Functions 2nd gen).
    ServerlessFunction,
}

impl TargetKind {
    pub const ALL: [TargetKind; 7] = [
        Self::Local,
        Self::ManagedCluster,
        Self::ManagedVm,
        Self::AppEngineFlex,
        Self::AppEngineStandard,
        Self::ServerlessContainer,
        Self::ServerlessFunction,
    ];

    /// Short name, used for subcommands and IaC directory names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ManagedCluster => "gke",
            Self::ManagedVm => "gce",
            Self::AppEngineFlex => "gae",
            Self::AppEngineStandard => "gae-standard",
            Self::ServerlessContainer => "cloud-run",
            Self::ServerlessFunction => "cloud-functions-gen2",
        }
    }

    /// Directory (relative to the IaC root) holding this target's module.
    pub fn tf_dir(self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown target '{s}'"))
    }
}

/// Parameters for running the test server in a local container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTarget {
    /// Container image to run.
    pub image: String,
    /// Port the server listens on inside and outside the container.
    #[serde(default = "default_local_port")]
    pub port: u16,
    /// Credentials key file mounted into the container, needed without a
    /// metadata server.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Container network, needed when the runner itself is containerized.
    #[serde(default)]
    pub network: Option<String>,
    /// User the container process runs as.
    #[serde(default)]
    pub container_user: Option<String>,
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

impl LocalTarget {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            port: DEFAULT_LOCAL_PORT,
            credentials_path: None,
            network: None,
            container_user: None,
        }
    }
}

/// Image-only targets (GKE, GCE, Cloud Run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTarget {
    pub image: String,
}

/// App Engine flexible: an image plus the runtime used to name the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEngineFlexTarget {
    pub image: String,
    pub runtime: String,
}

/// App Engine standard: deployed from a source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEngineStandardTarget {
    pub runtime: String,
    /// Absolute path of the zip archive holding the application source.
    pub app_source: PathBuf,
    /// Optional command App Engine uses to start the application.
    #[serde(default)]
    pub entrypoint: Option<String>,
}

/// Serverless function: deployed from a source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTarget {
    pub runtime: String,
    pub entry_point: String,
    /// Absolute path of the zip archive holding the function source.
    pub source: PathBuf,
}

/// The selected deployment target and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "kebab-case")]
pub enum TargetDescriptor {
    Local(LocalTarget),
    ManagedCluster(ImageTarget),
    ManagedVm(ImageTarget),
    AppEngineFlex(AppEngineFlexTarget),
    AppEngineStandard(AppEngineStandardTarget),
    ServerlessContainer(ImageTarget),
    ServerlessFunction(FunctionTarget),
}

impl TargetDescriptor {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Local(_) => TargetKind::Local,
            Self::ManagedCluster(_) => TargetKind::ManagedCluster,
            Self::ManagedVm(_) => TargetKind::ManagedVm,
            Self::AppEngineFlex(_) => TargetKind::AppEngineFlex,
            Self::AppEngineStandard(_) => TargetKind::AppEngineStandard,
            Self::ServerlessContainer(_) => TargetKind::ServerlessContainer,
            Self::ServerlessFunction(_) => TargetKind::ServerlessFunction,
        }
    }

    /// Check that every required parameter of the selected variant is usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        match self {
            Self::Local(t) => {
                check_image(kind, &t.image)?;
                if t.port == 0 {
                    return Err(ValidationError::InvalidField {
                        target: kind,
                        field: "port",
                        reason: "must be non-zero".to_string(),
                    });
                }
                if let Some(path) = &t.credentials_path {
                    check_absolute(kind, "credentials_path", path)?;
                }
                check_optional(kind, "network", t.network.as_deref())?;
                check_optional(kind, "container_user", t.container_user.as_deref())?;
            }
            Self::ManagedCluster(t) | Self::ManagedVm(t) | Self::ServerlessContainer(t) => {
                check_image(kind, &t.image)?;
            }
            Self::AppEngineFlex(t) => {
                check_image(kind, &t.image)?;
                check_required(kind, "runtime", &t.runtime)?;
            }
            Self::AppEngineStandard(t) => {
                check_required(kind, "runtime", &t.runtime)?;
                check_absolute(kind, "app_source", &t.app_source)?;
                check_optional(kind, "entrypoint", t.entrypoint.as_deref())?;
            }
            Self::ServerlessFunction(t) => {
                check_required(kind, "runtime", &t.runtime)?;
                check_required(kind, "entry_point", &t.entry_point)?;
                check_absolute(kind, "source", &t.source)?;
            }
        }
        Ok(())
    }

    /// Target-specific IaC variables. Run-wide variables (project, run id)
    /// are added by the provisioner.
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        match self {
            Self::Local(_) => {}
            Self::ManagedCluster(t) | Self::ManagedVm(t) | Self::ServerlessContainer(t) => {
                vars.insert("image".to_string(), t.image.clone());
            }
            Self::AppEngineFlex(t) => {
                vars.insert("image".to_string(), t.image.clone());
                vars.insert("runtime".to_string(), t.runtime.clone());
            }
            Self::AppEngineStandard(t) => {
                vars.insert("runtime".to_string(), t.runtime.clone());
                vars.insert("appsource".to_string(), path_var(&t.app_source));
                if let Some(entrypoint) = &t.entrypoint {
                    vars.insert("entrypoint".to_string(), entrypoint.clone());
                }
            }
            Self::ServerlessFunction(t) => {
                vars.insert("runtime".to_string(), t.runtime.clone());
                vars.insert("entrypoint".to_string(), t.entry_point.clone());
                vars.insert("functionsource".to_string(), path_var(&t.source));
            }
        }
        vars
    }
}

fn path_var(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn check_required(target: TargetKind, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { target, field });
    }
    Ok(())
}

fn check_optional(
    target: TargetKind,
    field: &'static str,
    value: Option<&str>,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_required(target, field, v),
        None => Ok(()),
    }
}

fn check_image(target: TargetKind, image: &str) -> Result<(), ValidationError> {
    check_required(target, "image", image)?;
    if image.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidField {
            target,
            field: "image",
            reason: "image references cannot contain whitespace".to_string(),
        });
    }
    Ok(())
}

fn check_absolute(target: TargetKind, field: &'static str, path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::MissingField { target, field });
    }
    // The IaC tool runs from its module directory, so relative paths would
    // resolve against the wrong base.
    if !path.is_absolute() {
        return Err(ValidationError::InvalidField {
            target,
            field,
            reason: format!("'{}' must be an absolute path", path.display()),
        });
    }
    Ok(())
}

/// Everything the health gate and client need to reach a deployed server.
///
/// `channels` holds auxiliary identifiers created as provisioning side
/// effects, such as the pub/sub topic used for out-of-band signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    endpoint: String,
    #[serde(default)]
    channels: BTreeMap<String, String>,
}

impl ConnectionInfo {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.channels.insert(name.into(), value.into());
        self
    }

    /// Base URL of the deployed server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn channel(&self, name: &str) -> Option<&str> {
        self.channels.get(name).map(String::as_str)
    }

    pub fn channels(&self) -> &BTreeMap<String, String> {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_guard;

    #[test]
    fn test_target_kind_round_trips_through_str() {
        let _guard = test_guard!();
        for kind in TargetKind::ALL {
            assert_eq!(kind.as_str().parse::<TargetKind>(), Ok(kind));
        }
        assert!("heroku".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_local_target_validates() {
        let _guard = test_guard!();
        let target = TargetDescriptor::Local(LocalTarget::new("test:v1"));
        assert_eq!(target.kind(), TargetKind::Local);
        assert!(target.validate().is_ok());
        assert!(target.variables().is_empty());
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let _guard = test_guard!();
        let target = TargetDescriptor::ManagedCluster(ImageTarget {
            image: "  ".to_string(),
        });
        assert_eq!(
            target.validate(),
            Err(ValidationError::MissingField {
                target: TargetKind::ManagedCluster,
                field: "image",
            })
        );
    }

    #[test]
    fn test_image_with_whitespace_is_rejected() {
        let _guard = test_guard!();
        let target = TargetDescriptor::ServerlessContainer(ImageTarget {
            image: "gcr.io/p/server:v1 --rm".to_string(),
        });
        assert!(matches!(
            target.validate(),
            Err(ValidationError::InvalidField { field: "image", .. })
        ));
    }

    #[test]
    fn test_local_zero_port_is_rejected() {
        let _guard = test_guard!();
        let mut local = LocalTarget::new("test:v1");
        local.port = 0;
        assert!(matches!(
            TargetDescriptor::Local(local).validate(),
            Err(ValidationError::InvalidField { field: "port", .. })
        ));
    }

    #[test]
    fn test_local_empty_network_is_rejected() {
        let _guard = test_guard!();
        let mut local = LocalTarget::new("test:v1");
        local.network = Some(String::new());
        assert_eq!(
            TargetDescriptor::Local(local).validate(),
            Err(ValidationError::MissingField {
                target: TargetKind::Local,
                field: "network",
            })
        );
    }

    #[test]
    fn test_relative_source_archive_is_rejected() {
        let _guard = test_guard!();
        let target = TargetDescriptor::ServerlessFunction(FunctionTarget {
            runtime: "python311".to_string(),
            entry_point: "handler".to_string(),
            source: PathBuf::from("build/function.zip"),
        });
        assert!(matches!(
            target.validate(),
            Err(ValidationError::InvalidField { field: "source", .. })
        ));
    }

    #[test]
    fn test_app_engine_standard_variables() {
        let _guard = test_guard!();
        let target = TargetDescriptor::AppEngineStandard(AppEngineStandardTarget {
            runtime: "nodejs20".to_string(),
            app_source: PathBuf::from("/tmp/app.zip"),
            entrypoint: Some("node server.js".to_string()),
        });
        assert!(target.validate().is_ok());

        let vars = target.variables();
        assert_eq!(vars.get("runtime").map(String::as_str), Some("nodejs20"));
        assert_eq!(vars.get("appsource").map(String::as_str), Some("/tmp/app.zip"));
        assert_eq!(vars.get("entrypoint").map(String::as_str), Some("node server.js"));
    }

    #[test]
    fn test_app_engine_flex_variables() {
        let _guard = test_guard!();
        let target = TargetDescriptor::AppEngineFlex(AppEngineFlexTarget {
            image: "gcr.io/p/server:v2".to_string(),
            runtime: "java".to_string(),
        });
        let vars = target.variables();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["image"], "gcr.io/p/server:v2");
        assert_eq!(vars["runtime"], "java");
    }

    #[test]
    fn test_descriptor_deserializes_from_tagged_toml() {
        let _guard = test_guard!();
        let target: TargetDescriptor = toml::from_str(
            r#"
target = "local"
image = "test:v1"
network = "cloudbuild"
"#,
        )
        .expect("descriptor should parse");

        match target {
            TargetDescriptor::Local(local) => {
                assert_eq!(local.port, DEFAULT_LOCAL_PORT);
                assert_eq!(local.network.as_deref(), Some("cloudbuild"));
            }
            other => panic!("expected local target, got {other:?}"),
        }
    }

    #[test]
    fn test_connection_info_channels() {
        let _guard = test_guard!();
        let info = ConnectionInfo::new("http://localhost:8000")
            .with_channel("request_topic", "e2e-request-abc")
            .with_channel("response_subscription", "e2e-response-abc");

        assert_eq!(info.endpoint(), "http://localhost:8000");
        assert_eq!(info.channel("request_topic"), Some("e2e-request-abc"));
        assert_eq!(info.channel("missing"), None);
        assert_eq!(info.channels().len(), 2);
    }
}
