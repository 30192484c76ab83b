//! Lifecycle state machine of one run.
//!
//! ```text
//! Idle -> Provisioning -> HealthChecking -> Ready -> InUse -> CleaningUp -> Done
//!   \__________\_______________\____________\________/
//!              (error path: any non-terminal state -> CleaningUp)
//! ```

use crate::events::{EventBus, RunEvent};
use e2e_common::RunId;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Provisioning,
    HealthChecking,
    Ready,
    /// The client has been handed to the test harness.
    InUse,
    CleaningUp,
    Done,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == Self::Done
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Provisioning)
                | (Provisioning, HealthChecking)
                | (HealthChecking, Ready)
                | (Ready, InUse)
                | (Idle | Provisioning | HealthChecking | Ready | InUse, CleaningUp)
                | (CleaningUp, Done)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::HealthChecking => write!(f, "health_checking"),
            Self::Ready => write!(f, "ready"),
            Self::InUse => write!(f, "in_use"),
            Self::CleaningUp => write!(f, "cleaning_up"),
            Self::Done => write!(f, "done"),
        }
    }
}

struct Inner {
    run_id: RunId,
    events: EventBus,
    history: Mutex<Vec<LifecycleState>>,
}

/// Shared tracker for a run's state; cloned into the run's `Cleanup`.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new(run_id: RunId, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                run_id,
                events,
                history: Mutex::new(vec![LifecycleState::Idle]),
            }),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.inner.run_id
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> LifecycleState {
        let history = self.inner.history.lock().unwrap_or_else(PoisonError::into_inner);
        *history.last().unwrap_or(&LifecycleState::Idle)
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> Vec<LifecycleState> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&self, next: LifecycleState) -> bool {
        let from = {
            let mut history = self.inner.history.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *history.last().unwrap_or(&LifecycleState::Idle);
            if !from.can_transition_to(next) {
                warn!(
                    run_id = %self.inner.run_id,
                    "Ignoring illegal lifecycle transition {} -> {}", from, next
                );
                return false;
            }
            history.push(next);
            from
        };

        info!(run_id = %self.inner.run_id, "Lifecycle {} -> {}", from, next);
        self.inner.events.publish(&RunEvent::LifecycleTransition {
            run_id: self.inner.run_id.to_string(),
            from,
            to: next,
        });
        true
    }
}
