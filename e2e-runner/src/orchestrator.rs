//! Lifecycle orchestrator.
//!
//! Sequences validation, provisioning, the health gate and client handoff for
//! one run, registering every cleanup handle before the step's result is
//! inspected. Callers get the aggregated [`Cleanup`] back on every path and
//! must run it.

use crate::cleanup::{Cleanup, CleanupHandle, CleanupReport, CleanupStack};
use crate::client::{ClientError, TestClient};
use crate::events::EventBus;
use crate::health::{HealthConfig, HealthError, HealthProbe, HttpHealthProbe, wait_healthy};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::provision::{
    CloudProvisioner, DockerCli, InfraBackend, LocalProvisioner, Provisioner, TerraformCli,
};
use e2e_common::{ProvisionError, RunId, RunnerConfig, TargetDescriptor, TargetKind, ValidationError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where a run was when it was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Provisioning,
    HealthCheck,
    Client,
    Tests,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::HealthCheck => write!(f, "health check"),
            Self::Client => write!(f, "client construction"),
            Self::Tests => write!(f, "tests"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid run configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("test server never became healthy: {0}")]
    HealthCheckTimeout(#[source] HealthError),

    #[error("run canceled during {stage}")]
    Canceled { stage: SetupStage },

    #[error("failed to construct test client: {0}")]
    Client(#[source] ClientError),
}

impl SetupError {
    /// Whether the run stopped because the caller canceled it.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Result of [`Orchestrator::setup`]. `cleanup` is valid on every path.
pub struct SetupOutcome {
    pub result: Result<Arc<TestClient>, SetupError>,
    pub cleanup: Cleanup,
    pub lifecycle: Lifecycle,
}

/// Result of [`Orchestrator::run_scoped`].
#[derive(Debug)]
pub struct ScopedRun<T> {
    pub result: Result<T, SetupError>,
    pub cleanup: CleanupReport,
}

pub struct OrchestratorBuilder {
    project_id: String,
    provisioners: HashMap<TargetKind, Arc<dyn Provisioner>>,
    probe: Option<Arc<dyn HealthProbe>>,
    health: HealthConfig,
    events: EventBus,
}

impl OrchestratorBuilder {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            provisioners: HashMap::new(),
            probe: None,
            health: HealthConfig::default(),
            events: EventBus::default(),
        }
    }

    /// Register a provisioner for every kind it reports.
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        for kind in provisioner.kinds() {
            self.provisioners.insert(kind, Arc::clone(&provisioner));
        }
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::MissingProjectId.into());
        }
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpHealthProbe::from_settings(&Default::default())?),
        };
        Ok(Orchestrator {
            project_id: self.project_id,
            provisioners: self.provisioners,
            probe,
            health: self.health,
            events: self.events,
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    project_id: String,
    provisioners: HashMap<TargetKind, Arc<dyn Provisioner>>,
    probe: Arc<dyn HealthProbe>,
    health: HealthConfig,
    events: EventBus,
}

impl Orchestrator {
    pub fn builder(project_id: impl Into<String>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(project_id)
    }

    /// Orchestrator backed by the Terraform and Docker CLIs.
    pub fn from_config(
        config: &RunnerConfig,
        project_id: &str,
        health_timeout: Duration,
        events: EventBus,
    ) -> anyhow::Result<Self> {
        let terraform: Arc<dyn InfraBackend> =
            Arc::new(TerraformCli::new(config.terraform.binary.clone()));
        let docker = Arc::new(DockerCli::new(config.docker.binary.clone()));
        let tf_root = config.terraform.root.clone();

        Self::builder(project_id)
            .provisioner(Arc::new(LocalProvisioner::new(
                Arc::clone(&terraform),
                docker,
                tf_root.clone(),
                project_id,
            )))
            .provisioner(Arc::new(CloudProvisioner::new(terraform, tf_root, project_id)))
            .probe(Arc::new(HttpHealthProbe::from_settings(&config.health)?))
            .health(HealthConfig::from_settings(&config.health).with_timeout(health_timeout))
            .events(events)
            .build()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn supports(&self, kind: TargetKind) -> bool {
        self.provisioners.contains_key(&kind)
    }

    /// Provision, health-gate and connect a client for one run.
    ///
    /// Handles are registered on the returned [`Cleanup`] as they are created.
    /// Setup runs in its own task; if it panics, everything registered so far
    /// is released before the panic is resumed.
    pub async fn setup(
        &self,
        cancel: &CancellationToken,
        descriptor: &TargetDescriptor,
        run_id: &RunId,
    ) -> SetupOutcome {
        let lifecycle = Lifecycle::new(run_id.clone(), self.events.clone());
        let cleanup = Cleanup::new(CleanupStack::new(), lifecycle.clone());
        let task = {
            let this = self.clone();
            let cancel = cancel.clone();
            let descriptor = descriptor.clone();
            let run_id = run_id.clone();
            let lifecycle = lifecycle.clone();
            let cleanup = cleanup.clone();
            tokio::spawn(async move {
                this.setup_inner(&cancel, &descriptor, &run_id, &lifecycle, &cleanup)
                    .await
            })
        };

        let result = match task.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(run_id = %run_id, "Setup aborted: {}", join_err);
                if let Err(err) = cleanup.run().await.into_result() {
                    error!(run_id = %run_id, "{}", err);
                }
                if join_err.is_panic() {
                    std::panic::resume_unwind(join_err.into_panic());
                }
                Err(SetupError::Canceled {
                    stage: SetupStage::Provisioning,
                })
            }
        };

        if let Err(err) = &result {
            if err.is_canceled() {
                warn!(run_id = %run_id, "Setup canceled: {}", err);
            } else {
                error!(run_id = %run_id, target = %descriptor.kind(), "Setup failed: {}", err);
            }
        }
        SetupOutcome {
            result,
            cleanup,
            lifecycle,
        }
    }

    async fn setup_inner(
        &self,
        cancel: &CancellationToken,
        descriptor: &TargetDescriptor,
        run_id: &RunId,
        lifecycle: &Lifecycle,
        cleanup: &Cleanup,
    ) -> Result<Arc<TestClient>, SetupError> {
        let kind = descriptor.kind();
        descriptor.validate()?;
        let provisioner = self
            .provisioners
            .get(&kind)
            .ok_or(ValidationError::UnsupportedTarget(kind))?;
        if cancel.is_cancelled() {
            return Err(SetupError::Canceled {
                stage: SetupStage::Provisioning,
            });
        }

        lifecycle.transition(LifecycleState::Provisioning);
        info!(run_id = %run_id, target = %kind, "Provisioning test server");
        let provisioned = provisioner.provision(cancel, run_id, descriptor).await;
        cleanup.push(provisioned.cleanup);
        let info = match provisioned.result {
            Ok(info) => info,
            Err(err) if err.is_canceled() || cancel.is_cancelled() => {
                return Err(SetupError::Canceled {
                    stage: SetupStage::Provisioning,
                });
            }
            Err(err) => return Err(err.into()),
        };

        lifecycle.transition(LifecycleState::HealthChecking);
        info!(
            run_id = %run_id,
            endpoint = %info.endpoint(),
            "Waiting up to {} for the server to become healthy",
            humantime::format_duration(self.health.timeout)
        );
        match wait_healthy(cancel, &info, self.probe.as_ref(), &self.health).await {
            Ok(_) => {}
            Err(HealthError::Canceled { .. }) => {
                return Err(SetupError::Canceled {
                    stage: SetupStage::HealthCheck,
                });
            }
            Err(err) => return Err(SetupError::HealthCheckTimeout(err)),
        }

        let client = match TestClient::connect(cancel, &self.project_id, run_id, info).await {
            Ok(client) => Arc::new(client),
            Err(ClientError::Canceled) => {
                return Err(SetupError::Canceled {
                    stage: SetupStage::Client,
                });
            }
            Err(err) => return Err(SetupError::Client(err)),
        };
        {
            let client = Arc::clone(&client);
            cleanup.push(CleanupHandle::new("close test client", move || async move {
                client.close();
                Ok(())
            }));
        }

        lifecycle.transition(LifecycleState::Ready);
        Ok(client)
    }

    /// Set up, run `body` with the client, then always clean up.
    ///
    /// `body` runs in its own task. If it panics, cleanup still runs and the
    /// panic is resumed afterwards.
    pub async fn run_scoped<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        descriptor: &TargetDescriptor,
        run_id: &RunId,
        body: F,
    ) -> ScopedRun<T>
    where
        F: FnOnce(Arc<TestClient>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let SetupOutcome {
            result,
            cleanup,
            lifecycle,
        } = self.setup(cancel, descriptor, run_id).await;

        let client = match result {
            Ok(client) => client,
            Err(err) => {
                let report = cleanup.run().await;
                return ScopedRun {
                    result: Err(err),
                    cleanup: report,
                };
            }
        };

        lifecycle.transition(LifecycleState::InUse);
        let joined = tokio::spawn(body(client, cancel.clone())).await;
        let report = cleanup.run().await;

        match joined {
            Ok(value) => ScopedRun {
                result: Ok(value),
                cleanup: report,
            },
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => ScopedRun {
                result: Err(SetupError::Canceled {
                    stage: SetupStage::Tests,
                }),
                cleanup: report,
            },
        }
    }
}
