//! What a UI talks to: loose request strings in, a validated job and a
//! background run handle out.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::PathResolver;
use crate::error::{ColetorError, PreflightError, WorkerError};
use crate::job::{ExecutionMode, JobSpec, Period, PeriodKind, Portal, Target};
use crate::orchestrator::Orchestrator;
use crate::progress::{ProgressBroadcaster, ProgressEvent};
use crate::report::{RunOutcome, RunStatistics};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_TASK_FAILURES: i32 = 1;
pub const EXIT_PREFLIGHT: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// A job as a UI collects it, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub portal: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    /// `dd/mm/yyyy` or `yyyy-mm-dd`.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// One municipality; `None` or `"all"` means the whole catalog.
    #[serde(default)]
    pub municipality: Option<String>,
    /// `None` or 1 runs sequentially.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub output_root: Option<PathBuf>,
}

impl RunRequest {
    /// Builds the job. Catalog membership is checked later, by pre-flight.
    pub fn to_job_spec(&self, paths: &PathResolver) -> Result<JobSpec, PreflightError> {
        let portal: Portal = self
            .portal
            .parse()
            .map_err(|_| PreflightError::UnknownPortal(self.portal.clone()))?;

        let target = match self.municipality.as_deref().map(str::trim) {
            None | Some("") => Target::All,
            Some(name) if name.eq_ignore_ascii_case("all") || name.eq_ignore_ascii_case("todos") => {
                Target::All
            }
            Some(name) => Target::One(name.to_string()),
        };

        let mode = match self.workers {
            None | Some(1) => ExecutionMode::Sequential,
            Some(n) => ExecutionMode::Parallel(n),
        };

        let output_root = self
            .output_root
            .clone()
            .unwrap_or_else(|| paths.output_root().to_path_buf());

        Ok(JobSpec::new(
            portal,
            self.period(portal)?,
            target,
            mode,
            output_root,
        ))
    }

    fn period(&self, portal: Portal) -> Result<Period, PreflightError> {
        let missing = |what: &str| {
            PreflightError::InvalidPeriod(format!("{} is required for portal {}", what, portal))
        };
        let period = match portal.period_kind() {
            PeriodKind::None => Period::None,
            PeriodKind::Year => Period::Year {
                year: self.year.ok_or_else(|| missing("year"))?,
            },
            PeriodKind::YearMonth => Period::YearMonth {
                year: self.year.ok_or_else(|| missing("year"))?,
                month: self.month.ok_or_else(|| missing("month"))?,
            },
            PeriodKind::DateRange => Period::DateRange {
                start: parse_date(self.start.as_deref().ok_or_else(|| missing("start date"))?)?,
                end: parse_date(self.end.as_deref().ok_or_else(|| missing("end date"))?)?,
            },
        };
        Ok(period)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, PreflightError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| PreflightError::InvalidPeriod(format!("'{}' is not a date", raw)))
}

/// A run executing on its own thread.
pub struct RunHandle {
    cancel: CancelToken,
    progress: ProgressBroadcaster,
    handle: JoinHandle<Result<RunStatistics, PreflightError>>,
}

impl RunHandle {
    /// Asks the run to stop. Tasks in flight are abandoned at their next step.
    pub fn cancel(&self) {
        info!("Cancellation requested by the UI");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Events from now on. Subscribe through the broadcaster passed to
    /// [`spawn_run`] to see the pre-flight events too.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<RunStatistics, ColetorError> {
        match self.handle.join() {
            Ok(result) => Ok(result?),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(WorkerError::Panicked(message).into())
            }
        }
    }
}

/// Starts `spec` on a background thread, publishing progress on `progress`.
pub fn spawn_run(
    orchestrator: Arc<Orchestrator>,
    spec: JobSpec,
    progress: ProgressBroadcaster,
) -> Result<RunHandle, WorkerError> {
    let cancel = CancelToken::new();
    let run_cancel = cancel.clone();
    let run_progress = progress.clone();

    let handle = thread::Builder::new()
        .name("coletor-run".to_string())
        .spawn(move || orchestrator.run(&spec, &run_progress, &run_cancel))
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    Ok(RunHandle {
        cancel,
        progress,
        handle,
    })
}

/// Process exit code for a finished run.
pub fn exit_code(result: &Result<RunStatistics, ColetorError>) -> i32 {
    match result {
        Ok(stats) => match stats.outcome() {
            RunOutcome::Success => EXIT_SUCCESS,
            RunOutcome::Partial => EXIT_TASK_FAILURES,
            RunOutcome::Cancelled => EXIT_CANCELLED,
            RunOutcome::Aborted => EXIT_PREFLIGHT,
        },
        Err(ColetorError::Preflight(_)) => EXIT_PREFLIGHT,
        Err(_) => EXIT_TASK_FAILURES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallMode;
    use crate::job::{Started, Task, TaskResult};
    use std::path::Path;

    fn paths() -> PathResolver {
        PathResolver::for_mode(InstallMode::Dev, Path::new("/srv/coletor"))
    }

    #[test]
    fn test_date_range_request() {
        let request = RunRequest {
            portal: "bb".into(),
            start: Some("01/06/2024".into()),
            end: Some("2024-06-30".into()),
            municipality: Some("BELO HORIZONTE".into()),
            ..RunRequest::default()
        };
        let spec = request.to_job_spec(&paths()).unwrap();
        assert_eq!(spec.portal, Portal::FederalTransfer);
        assert_eq!(spec.period.range_days(), Some(30));
        assert_eq!(spec.target, Target::One("BELO HORIZONTE".into()));
        assert_eq!(spec.mode, ExecutionMode::Sequential);
        assert_eq!(spec.output_root, Path::new("/srv/coletor/saida"));
    }

    #[test]
    fn test_missing_period_fields_are_rejected() {
        let request = RunRequest {
            portal: "mds".into(),
            year: Some(2025),
            ..RunRequest::default()
        };
        let err = request.to_job_spec(&paths()).unwrap_err();
        assert!(err.to_string().contains("month is required"));

        let request = RunRequest {
            portal: "bb".into(),
            start: Some("31/02/2024".into()),
            end: Some("01/03/2024".into()),
            ..RunRequest::default()
        };
        assert!(matches!(
            request.to_job_spec(&paths()),
            Err(PreflightError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_target_and_mode_defaults() {
        let request = RunRequest {
            portal: "fns".into(),
            municipality: Some("todos".into()),
            workers: Some(3),
            output_root: Some(PathBuf::from("/tmp/out")),
            ..RunRequest::default()
        };
        let spec = request.to_job_spec(&paths()).unwrap();
        assert_eq!(spec.period, Period::None);
        assert_eq!(spec.target, Target::All);
        assert_eq!(spec.mode, ExecutionMode::Parallel(3));
        assert_eq!(spec.output_root, Path::new("/tmp/out"));
    }

    #[test]
    fn test_unknown_portal() {
        let request = RunRequest {
            portal: "detran".into(),
            ..RunRequest::default()
        };
        assert!(matches!(
            request.to_job_spec(&paths()),
            Err(PreflightError::UnknownPortal(_))
        ));
    }

    #[test]
    fn test_exit_codes() {
        let task = Task::new(0, Portal::HealthFundBalance, Period::None, "ARAXA".into());
        let mut stats = RunStatistics::new("r", Portal::HealthFundBalance, Period::None, 1);
        stats.record(TaskResult::no_data(&task, vec![], Started::now()));
        stats.finish(false);
        assert_eq!(exit_code(&Ok(stats.clone())), EXIT_SUCCESS);

        let mut failed = RunStatistics::new("r", Portal::HealthFundBalance, Period::None, 1);
        failed.record(TaskResult::failed(
            &task,
            crate::job::ErrorKind::BrowserFatal,
            "gone",
            Started::now(),
        ));
        failed.finish(false);
        assert_eq!(exit_code(&Ok(failed)), EXIT_TASK_FAILURES);

        let mut cancelled = RunStatistics::new("r", Portal::HealthFundBalance, Period::None, 1);
        cancelled.finish(true);
        assert_eq!(exit_code(&Ok(cancelled)), EXIT_CANCELLED);

        let aborted: Result<RunStatistics, ColetorError> =
            Err(PreflightError::EmptyTarget.into());
        assert_eq!(exit_code(&aborted), EXIT_PREFLIGHT);
    }
}
