//! Runner configuration file (`config.toml`) with environment overrides.

use super::env::{EnvError, EnvParser, expand_home};
use super::source::ConfigSource;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Accepted `[health] poll_interval_ms`.
pub const POLL_INTERVAL_MS_RANGE: RangeInclusive<u64> = 10..=60_000;
/// Accepted `[health] request_timeout_ms`.
pub const REQUEST_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 100..=300_000;
/// Accepted `[health] timeout_secs`, also the bound of `--health-check-timeout`.
pub const HEALTH_TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 1..=86_400;

/// Runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub health: HealthSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerraformConfig {
    /// Directory holding one module per target plus `persistent/`.
    #[serde(default = "default_tf_root")]
    pub root: PathBuf,
    /// Terraform executable.
    #[serde(default = "default_terraform_binary")]
    pub binary: String,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            root: default_tf_root(),
            binary: default_terraform_binary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker executable.
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Delay between health probes (ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout of a single probe request (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Overall budget for the server to become healthy (s).
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    /// Path appended to the endpoint for probes.
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            timeout_secs: default_health_timeout_secs(),
            path: default_health_path(),
        }
    }
}

impl HealthSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check every value against the same bounds the `E2E_*` overrides use.
    pub fn validate(&self) -> Result<()> {
        check_range("poll_interval_ms", self.poll_interval_ms, &POLL_INTERVAL_MS_RANGE)?;
        check_range("request_timeout_ms", self.request_timeout_ms, &REQUEST_TIMEOUT_MS_RANGE)?;
        check_range("timeout_secs", self.timeout_secs, &HEALTH_TIMEOUT_SECS_RANGE)?;
        Ok(())
    }
}

fn default_tf_root() -> PathBuf {
    PathBuf::from("tf")
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_health_timeout_secs() -> u64 {
    120
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn check_range(name: &str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    ensure!(
        range.contains(&value),
        "{name} = {value} is outside {}..={}",
        range.start(),
        range.end()
    );
    Ok(())
}

/// Default location: `<config dir>/e2e-runner/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("e2e-runner").join("config.toml"))
}

impl RunnerConfig {
    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.terraform.root = expand_home(&config.terraform.root.to_string_lossy());
        config
            .health
            .validate()
            .with_context(|| format!("Invalid [health] section in {}", path.display()))?;
        Ok(config)
    }

    /// Load the explicit config file, or the default one if it exists, or
    /// built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, ConfigSource::File));
        }
        match default_config_path() {
            Some(path) if path.is_file() => {
                debug!("Loading runner config from {}", path.display());
                Ok((Self::from_file(&path)?, ConfigSource::File))
            }
            _ => Ok((Self::default(), ConfigSource::Default)),
        }
    }

    /// Apply `E2E_*` overrides. Returns every malformed variable.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Vec<EnvError> {
        let root = parser.get_path("TF_ROOT", &self.terraform.root.to_string_lossy(), false);
        if root.is_set() {
            self.terraform.root = root.value;
        }
        let terraform = parser.get_string("TERRAFORM_BIN", &self.terraform.binary);
        self.terraform.binary = terraform.value;
        let docker = parser.get_string("DOCKER_BIN", &self.docker.binary);
        self.docker.binary = docker.value;

        self.health.poll_interval_ms = parser
            .get_u64_range(
                "HEALTH_POLL_INTERVAL_MS",
                self.health.poll_interval_ms,
                *POLL_INTERVAL_MS_RANGE.start(),
                *POLL_INTERVAL_MS_RANGE.end(),
            )
            .value;
        self.health.request_timeout_ms = parser
            .get_u64_range(
                "HEALTH_REQUEST_TIMEOUT_MS",
                self.health.request_timeout_ms,
                *REQUEST_TIMEOUT_MS_RANGE.start(),
                *REQUEST_TIMEOUT_MS_RANGE.end(),
            )
            .value;
        self.health.timeout_secs = parser
            .get_u64_range(
                "HEALTH_TIMEOUT_SECS",
                self.health.timeout_secs,
                *HEALTH_TIMEOUT_SECS_RANGE.start(),
                *HEALTH_TIMEOUT_SECS_RANGE.end(),
            )
            .value;
        self.health.path = parser.get_string("HEALTH_PATH", &self.health.path).value;

        parser.take_errors()
    }
}
