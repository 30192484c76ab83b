//! Cleanup handles and the aggregated, run-once cleanup of a run.
//!
//! A provisioning step pushes its release action onto a [`CleanupStack`]
//! *before* it starts creating anything. The orchestrator registers every
//! step's handle in one stack and wraps it in a [`Cleanup`], which unwinds
//! the stack in reverse registration order exactly once. A failing action is
//! recorded and logged; the remaining actions still run.

use crate::events::RunEvent;
use crate::lifecycle::{Lifecycle, LifecycleState};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info};

/// Future returned by a cleanup action.
pub type CleanupFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send + 'static>;

/// Releases the resources created by one provisioning step.
///
/// Running consumes the handle, so an action can never run twice.
pub struct CleanupHandle {
    label: String,
    action: Option<CleanupFn>,
}

impl CleanupHandle {
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            action: Some(Box::new(move || Box::pin(action()) as CleanupFuture)),
        }
    }

    /// Handle for a step that created nothing.
    pub fn noop() -> Self {
        Self {
            label: "noop".to_string(),
            action: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn run(self) -> anyhow::Result<()> {
        match self.action {
            Some(action) => action().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("label", &self.label)
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// One cleanup action that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub label: String,
    pub message: String,
}

/// One or more cleanup actions failed. Never replaces a setup error.
#[derive(Debug, Clone, Error)]
#[error("{} cleanup action(s) failed: {}", failures.len(), summarize(failures))]
pub struct CleanupError {
    pub failures: Vec<CleanupFailure>,
}

fn summarize(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.label, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of unwinding a cleanup stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Labels of the actions that ran, in execution order.
    pub attempted: Vec<String>,
    pub failures: Vec<CleanupFailure>,
    /// The aggregated cleanup had already run; nothing was done.
    pub already_ran: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<(), CleanupError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError {
                failures: self.failures,
            })
        }
    }
}

/// Ordered cleanup handles, unwound last-registered first.
#[derive(Debug, Default)]
pub struct CleanupStack {
    handles: Vec<CleanupHandle>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. No-op handles are dropped.
    pub fn push(&mut self, handle: CleanupHandle) {
        if !handle.is_noop() {
            debug!("Registered cleanup action '{}'", handle.label());
            self.handles.push(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Labels in registration order.
    pub fn labels(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.label.clone()).collect()
    }

    /// Run every handle in reverse registration order.
    ///
    /// Dropping the returned future part way logs the actions that did not
    /// finish.
    pub async fn unwind(self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut unwinding = Unwinding {
            pending: self.handles,
            running: None,
        };
        while let Some(handle) = unwinding.pending.pop() {
            let label = handle.label.clone();
            debug!("Running cleanup action '{}'", label);
            unwinding.running = Some(label.clone());
            let result = handle.run().await;
            unwinding.running = None;
            if let Err(err) = result {
                error!("Cleanup action '{}' failed: {:#}", label, err);
                report.failures.push(CleanupFailure {
                    label: label.clone(),
                    message: format!("{err:#}"),
                });
            }
            report.attempted.push(label);
        }
        report
    }

    /// Collapse the stack into one handle that unwinds it.
    pub fn into_handle(self, label: impl Into<String>) -> CleanupHandle {
        if self.is_empty() {
            return CleanupHandle::noop();
        }
        CleanupHandle::new(label, move || async move {
            self.unwind().await.into_result().map_err(anyhow::Error::from)
        })
    }
}

/// Handles of an unwind in progress, in registration order.
struct Unwinding {
    pending: Vec<CleanupHandle>,
    running: Option<String>,
}

impl Unwinding {
    /// Actions that have not completed, in the order they would have run.
    fn unfinished(&self) -> Vec<String> {
        self.running
            .iter()
            .cloned()
            .chain(self.pending.iter().rev().map(|h| h.label.clone()))
            .collect()
    }
}

impl Drop for Unwinding {
    fn drop(&mut self) {
        let unfinished = self.unfinished();
        if !unfinished.is_empty() {
            error!(
                "Cleanup interrupted; resources may leak: {}",
                unfinished.join(", ")
            );
        }
    }
}

struct CleanupInner {
    stack: Mutex<Option<CleanupStack>>,
    lifecycle: Option<Lifecycle>,
}

impl Drop for CleanupInner {
    fn drop(&mut self) {
        let stack = self.stack.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(stack) = stack.take()
            && !stack.is_empty()
        {
            let run_id = self
                .lifecycle
                .as_ref()
                .map(|lc| lc.run_id().to_string())
                .unwrap_or_default();
            error!(
                run_id = %run_id,
                "Cleanup dropped without running; resources may leak: {}",
                stack.labels().join(", ")
            );
        }
    }
}

/// The aggregated cleanup of one run.
///
/// Clones share the same stack. The first [`Cleanup::run`] unwinds it; any
/// later or concurrent call returns a report with `already_ran` set.
#[derive(Clone)]
pub struct Cleanup {
    inner: Arc<CleanupInner>,
}

impl Cleanup {
    pub(crate) fn new(stack: CleanupStack, lifecycle: Lifecycle) -> Self {
        Self {
            inner: Arc::new(CleanupInner {
                stack: Mutex::new(Some(stack)),
                lifecycle: Some(lifecycle),
            }),
        }
    }

    /// Aggregated cleanup over a stack, without lifecycle tracking.
    pub fn from_stack(stack: CleanupStack) -> Self {
        Self {
            inner: Arc::new(CleanupInner {
                stack: Mutex::new(Some(stack)),
                lifecycle: None,
            }),
        }
    }

    /// Register a handle on a cleanup that has not run yet.
    pub(crate) fn push(&self, handle: CleanupHandle) {
        let mut stack = self.inner.stack.lock().unwrap_or_else(PoisonError::into_inner);
        match stack.as_mut() {
            Some(stack) => stack.push(handle),
            None if handle.is_noop() => {}
            None => error!(
                "Cleanup already ran; '{}' will not be released",
                handle.label()
            ),
        }
    }

    /// Number of actions still waiting to run.
    pub fn pending(&self) -> usize {
        self.inner
            .stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, CleanupStack::len)
    }

    pub fn has_run(&self) -> bool {
        self.inner
            .stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub async fn run(&self) -> CleanupReport {
        let stack = self
            .inner
            .stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(stack) = stack else {
            debug!("Cleanup already ran; skipping");
            return CleanupReport {
                already_ran: true,
                ..CleanupReport::default()
            };
        };

        let lifecycle = self.inner.lifecycle.as_ref();
        if let Some(lc) = lifecycle {
            lc.transition(LifecycleState::CleaningUp);
        }

        let pending = stack.len();
        if pending > 0 {
            info!("Cleaning up {} registered resource(s)", pending);
        }
        let report = stack.unwind().await;

        if let Some(lc) = lifecycle {
            let run_id = lc.run_id().to_string();
            for failure in &report.failures {
                lc.events().publish(&RunEvent::CleanupActionFailed {
                    run_id: run_id.clone(),
                    label: failure.label.clone(),
                    message: failure.message.clone(),
                });
            }
            lc.events().publish(&RunEvent::CleanupFinished {
                run_id,
                attempted: report.attempted.len(),
                failed: report.failures.len(),
            });
            lc.transition(LifecycleState::Done);
        }
        report
    }
}
