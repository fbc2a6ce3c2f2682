use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::portal::Portal;
use super::spec::Period;

/// One (portal, period, municipality) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Position in the expanded target list (0-based).
    pub index: usize,
    pub portal: Portal,
    pub period: Period,
    pub municipality: String,
    pub worker_id: usize,
}

impl Task {
    pub fn new(index: usize, portal: Portal, period: Period, municipality: String) -> Self {
        Self {
            index,
            portal,
            period,
            municipality,
            worker_id: 0,
        }
    }

    pub fn assigned_to(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    /// The portal legitimately returned nothing for this municipality/period.
    NoData,
    Failed,
    /// Interrupted by the cancellation token; counted apart from failures.
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::NoData => write!(f, "no-data"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationTimeout,
    ElementTimeout,
    DownloadTimeout,
    MunicipalityNotFound,
    BrowserFatal,
    Storage,
    Cancelled,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NavigationTimeout => "NavigationTimeout",
            ErrorKind::ElementTimeout => "ElementTimeout",
            ErrorKind::DownloadTimeout => "DownloadTimeout",
            ErrorKind::MunicipalityNotFound => "MunicipalityNotFound",
            ErrorKind::BrowserFatal => "BrowserFatal",
            ErrorKind::Storage => "Storage",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Unexpected => "Unexpected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: Task,
    pub status: TaskStatus,
    /// Materialized files; dual-page portals produce one per page.
    pub outputs: Vec<PathBuf>,
    pub error: Option<TaskError>,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

impl TaskResult {
    fn build(
        task: &Task,
        status: TaskStatus,
        outputs: Vec<PathBuf>,
        error: Option<TaskError>,
        started: Started,
    ) -> Self {
        Self {
            task: task.clone(),
            status,
            outputs,
            error,
            started_at: started.at,
            elapsed: started.clock.elapsed(),
        }
    }

    pub fn succeeded(task: &Task, outputs: Vec<PathBuf>, started: Started) -> Self {
        Self::build(task, TaskStatus::Succeeded, outputs, None, started)
    }

    /// No-data result. Dual-page portals may still have materialized the page
    /// that did have rows.
    pub fn no_data(task: &Task, outputs: Vec<PathBuf>, started: Started) -> Self {
        Self::build(task, TaskStatus::NoData, outputs, None, started)
    }

    pub fn failed(
        task: &Task,
        kind: ErrorKind,
        message: impl Into<String>,
        started: Started,
    ) -> Self {
        let error = TaskError {
            kind,
            message: message.into(),
        };
        Self::build(task, TaskStatus::Failed, vec![], Some(error), started)
    }

    pub fn cancelled(task: &Task, started: Started) -> Self {
        let error = TaskError {
            kind: ErrorKind::Cancelled,
            message: "cancelled before completion".to_string(),
        };
        Self::build(task, TaskStatus::Cancelled, vec![], Some(error), started)
    }

    /// First materialized file, if any.
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.outputs.first()
    }

    /// Downgrades a success whose files are missing or empty to a storage failure.
    pub fn verified(mut self) -> Self {
        if self.status != TaskStatus::Succeeded {
            return self;
        }
        if self.outputs.is_empty() {
            self.status = TaskStatus::Failed;
            self.error = Some(TaskError {
                kind: ErrorKind::Storage,
                message: "adapter reported success without an output file".to_string(),
            });
            return self;
        }
        for path in &self.outputs {
            let non_empty = std::fs::metadata(path)
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if !non_empty {
                let message = format!("output '{}' is missing or empty", path.display());
                self.status = TaskStatus::Failed;
                self.error = Some(TaskError {
                    kind: ErrorKind::Storage,
                    message,
                });
                self.outputs.clear();
                break;
            }
        }
        self
    }
}

/// Start marker captured when an adapter begins a task.
#[derive(Debug, Clone, Copy)]
pub struct Started {
    at: DateTime<Local>,
    clock: Instant,
}

impl Started {
    pub fn now() -> Self {
        Self {
            at: Local::now(),
            clock: Instant::now(),
        }
    }
}
