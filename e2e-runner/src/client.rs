//! Client handed to the test suite once the server is healthy.

use e2e_common::{ConnectionInfo, RunId};
use reqwest::{Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_PROJECT_ID: &str = "PROJECT_ID";
pub const ENV_TEST_RUN_ID: &str = "TEST_RUN_ID";
pub const ENV_ENDPOINT: &str = "TEST_SERVER_ENDPOINT";
const ENV_CHANNEL_PREFIX: &str = "TEST_SERVER_";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("client construction canceled")]
    Canceled,
}

/// Connected handle to one deployed test server.
#[derive(Debug)]
pub struct TestClient {
    project_id: String,
    run_id: RunId,
    info: ConnectionInfo,
    base_url: Url,
    http: Client,
    closed: AtomicBool,
}

impl TestClient {
    pub async fn connect(
        cancel: &CancellationToken,
        project_id: &str,
        run_id: &RunId,
        info: ConnectionInfo,
    ) -> Result<Self, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }

        let base_url = Url::parse(info.endpoint()).map_err(|e| ClientError::InvalidEndpoint {
            endpoint: info.endpoint().to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidEndpoint {
                endpoint: info.endpoint().to_string(),
                reason: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }
        let http = Client::builder().timeout(CLIENT_TIMEOUT).build()?;

        info!(run_id = %run_id, endpoint = %base_url, "Test client connected");
        Ok(Self {
            project_id: project_id.to_string(),
            run_id: run_id.clone(),
            info,
            base_url,
            http,
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.info.endpoint()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn channel(&self, name: &str) -> Option<&str> {
        self.info.channel(name)
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// HTTP client for talking to the server directly.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Environment exported to the external test command.
    ///
    /// Channel names are upper-cased and non-alphanumerics become `_`, so
    /// `request_topic` is exported as `TEST_SERVER_REQUEST_TOPIC`.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (ENV_PROJECT_ID.to_string(), self.project_id.clone()),
            (ENV_TEST_RUN_ID.to_string(), self.run_id.to_string()),
            (ENV_ENDPOINT.to_string(), self.info.endpoint().to_string()),
        ];
        for (name, value) in self.info.channels() {
            vars.push((channel_env_name(name), value.clone()));
        }
        vars
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the client. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            debug!(run_id = %self.run_id, "Test client closed");
        }
        first
    }
}

fn channel_env_name(channel: &str) -> String {
    let suffix: String = channel
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_CHANNEL_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2e_common::test_guard;

    fn run_id() -> RunId {
        RunId::parse("client-test").unwrap()
    }

    #[tokio::test]
    async fn test_env_vars_export_endpoint_and_channels() {
        let _guard = test_guard!();
        let info = ConnectionInfo::new("http://127.0.0.1:8000")
            .with_channel("request_topic", "requests-client-test")
            .with_channel("response-subscription", "responses-client-test");
        let client = TestClient::connect(&CancellationToken::new(), "proj", &run_id(), info)
            .await
            .unwrap();

        let vars = client.env_vars();
        assert!(vars.contains(&("PROJECT_ID".into(), "proj".into())));
        assert!(vars.contains(&("TEST_RUN_ID".into(), "client-test".into())));
        assert!(vars.contains(&("TEST_SERVER_ENDPOINT".into(), "http://127.0.0.1:8000".into())));
        assert!(vars.contains(&(
            "TEST_SERVER_REQUEST_TOPIC".into(),
            "requests-client-test".into()
        )));
        assert!(vars.contains(&(
            "TEST_SERVER_RESPONSE_SUBSCRIPTION".into(),
            "responses-client-test".into()
        )));
        assert_eq!(client.channel("request_topic"), Some("requests-client-test"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let _guard = test_guard!();
        let client = TestClient::connect(
            &CancellationToken::new(),
            "proj",
            &run_id(),
            ConnectionInfo::new("https://svc.example.com"),
        )
        .await
        .unwrap();

        assert!(!client.is_closed());
        assert!(client.close());
        assert!(!client.close());
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_rejects_unusable_endpoints() {
        let _guard = test_guard!();
        let cancel = CancellationToken::new();
        for endpoint in ["not a url", "ftp://example.com"] {
            let err = TestClient::connect(&cancel, "proj", &run_id(), ConnectionInfo::new(endpoint))
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::InvalidEndpoint { .. }), "{endpoint}");
        }
    }

    #[tokio::test]
    async fn test_connect_observes_cancellation() {
        let _guard = test_guard!();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TestClient::connect(&cancel, "proj", &run_id(), ConnectionInfo::new("http://x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Canceled));
    }
}
