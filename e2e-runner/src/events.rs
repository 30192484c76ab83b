//! Broadcast of run events as JSON lines.
//!
//! Subscribers (the CLI's event logger, tests) receive every lifecycle
//! transition and cleanup outcome of the runs sharing the bus.

use crate::lifecycle::LifecycleState;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Events published during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    LifecycleTransition {
        run_id: String,
        from: LifecycleState,
        to: LifecycleState,
    },
    CleanupActionFailed {
        run_id: String,
        label: String,
        message: String,
    },
    CleanupFinished {
        run_id: String,
        attempted: usize,
        failed: usize,
    },
}

/// Broadcast channel for run events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    /// Create a new event bus. The buffer is clamped to at least
    /// `DEFAULT_BUFFER`.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(DEFAULT_BUFFER));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: &RunEvent) {
        let mut payload = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to serialize run event {:?}: {}", event, err);
                return;
            }
        };
        payload["timestamp"] = json!(Utc::now().to_rfc3339());
        let _ = self.sender.send(payload.to_string());
    }
}
