//! Progress events delivered to the UI while a run is in flight.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{TaskResult, TaskStatus};

/// Phase of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Preflight,
    Starting,
    TaskStarted,
    TaskFinished,
    Cancelling,
    Reporting,
    Completed,
    Cancelled,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Preflight => write!(f, "Pre-flight checks"),
            RunPhase::Starting => write!(f, "Starting"),
            RunPhase::TaskStarted => write!(f, "Task started"),
            RunPhase::TaskFinished => write!(f, "Task finished"),
            RunPhase::Cancelling => write!(f, "Cancelling"),
            RunPhase::Reporting => write!(f, "Writing report"),
            RunPhase::Completed => write!(f, "Completed"),
            RunPhase::Cancelled => write!(f, "Cancelled"),
            RunPhase::Aborted => write!(f, "Aborted"),
        }
    }
}

/// `(phase, message, current, total)` plus task details when relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: String,
    pub phase: RunPhase,
    pub message: String,
    /// Tasks finished so far.
    pub current: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        run_id: &str,
        phase: RunPhase,
        message: impl Into<String>,
        current: usize,
        total: usize,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            phase,
            message: message.into(),
            current,
            total,
            municipality: None,
            worker_id: None,
            status: None,
            timestamp: Utc::now(),
        }
    }

    /// Event for a finished task.
    pub fn task_finished(run_id: &str, result: &TaskResult, current: usize, total: usize) -> Self {
        let message = match &result.error {
            Some(error) => format!("{}: {} ({})", result.task.municipality, result.status, error.message),
            None => format!("{}: {}", result.task.municipality, result.status),
        };
        Self {
            municipality: Some(result.task.municipality.clone()),
            worker_id: Some(result.task.worker_id),
            status: Some(result.status),
            ..Self::new(run_id, RunPhase::TaskFinished, message, current, total)
        }
    }

    pub fn with_municipality(mut self, municipality: &str, worker_id: usize) -> Self {
        self.municipality = Some(municipality.to_string());
        self.worker_id = Some(worker_id);
        self
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to a closure.
pub struct FnProgress<F>(pub F);

impl<F> ProgressReporter for FnProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

/// Broadcasts progress events to any number of UI subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for ProgressBroadcaster {
    fn report(&self, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}
