//! Health gate: poll a deployed server until it answers or the budget runs out.

use async_trait::async_trait;
use e2e_common::ConnectionInfo;
use e2e_common::config::HealthSettings;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline used when `timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Polling parameters of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }
}

impl HealthConfig {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            timeout: settings.timeout(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One readiness check against a deployed server.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok` when the server is healthy; otherwise a short reason.
    async fn check(&self, info: &ConnectionInfo) -> Result<(), String>;
}

/// `GET <endpoint><path>`; any 2xx status is healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(path: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let path = path.into();
        let path = if path.is_empty() || path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Ok(Self { client, path })
    }

    pub fn from_settings(settings: &HealthSettings) -> anyhow::Result<Self> {
        Self::new(settings.path.clone(), settings.request_timeout())
    }

    fn url(&self, info: &ConnectionInfo) -> String {
        format!("{}{}", info.endpoint().trim_end_matches('/'), self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, info: &ConnectionInfo) -> Result<(), String> {
        let url = self.url(info);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET {url}: {e}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("GET {url}: status {}", response.status()))
        }
    }
}

/// Result of a successful gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("health check canceled after {attempts} attempt(s)")]
    Canceled { attempts: u32 },

    #[error("server not healthy after {}", describe_timeout(.elapsed, .attempts, .last_failure))]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        last_failure: Option<String>,
    },
}

fn describe_timeout(elapsed: &Duration, attempts: &u32, last_failure: &Option<String>) -> String {
    let mut out = format!(
        "{} ({} attempt(s))",
        humantime::format_duration(*elapsed),
        attempts
    );
    if let Some(reason) = last_failure {
        out.push_str(": ");
        out.push_str(reason);
    }
    out
}

/// Poll `probe` until it succeeds, `config.timeout` elapses or `cancel` fires.
///
/// The first probe runs immediately. Every probe and every pause between
/// probes is raced against both the deadline and the token.
pub async fn wait_healthy(
    cancel: &CancellationToken,
    info: &ConnectionInfo,
    probe: &dyn HealthProbe,
    config: &HealthConfig,
) -> Result<HealthReport, HealthError> {
    let start = Instant::now();
    let deadline = start
        .checked_add(config.timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut attempts = 0u32;
    let mut last_failure: Option<String> = None;

    let timed_out = |attempts: u32, last_failure: Option<String>| HealthError::Timeout {
        elapsed: start.elapsed(),
        attempts,
        last_failure,
    };

    loop {
        if cancel.is_cancelled() {
            return Err(HealthError::Canceled { attempts });
        }
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HealthError::Canceled { attempts }),
            () = sleep_until(deadline) => return Err(timed_out(attempts, last_failure)),
            outcome = probe.check(info) => outcome,
        };

        match outcome {
            Ok(()) => {
                let elapsed = start.elapsed();
                info!(
                    endpoint = %info.endpoint(),
                    "Server healthy after {} attempt(s) in {:?}",
                    attempts,
                    elapsed
                );
                return Ok(HealthReport { attempts, elapsed });
            }
            Err(reason) => {
                debug!(attempt = attempts, "Health probe failed: {}", reason);
                last_failure = Some(reason);
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HealthError::Canceled { attempts }),
            () = sleep_until(deadline) => return Err(timed_out(attempts, last_failure)),
            () = sleep(config.interval) => {}
        }
    }
}
