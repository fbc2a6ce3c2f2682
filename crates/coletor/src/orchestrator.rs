//! Runs a job: pre-flight checks, task expansion, sequential or sharded
//! execution, then the run report.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::catalog::{self, MunicipalityCatalog};
use crate::config::{PathResolver, Settings};
use crate::error::{ConfigError, PreflightError};
use crate::job::{ErrorKind, JobSpec, Started, Task, TaskResult, TaskStatus};
use crate::portal::{AdapterRegistry, PortalAdapter};
use crate::progress::{ProgressEvent, ProgressReporter, RunPhase};
use crate::report::{RunOutcome, RunReporter, RunStatistics};
use crate::sanitize::redact_path;
use crate::session::kill::Watchdog;
use crate::session::{KillRegistry, SessionFactory, WebDriverFactory};
use crate::sink::ResultSink;
use crate::worker::{run_shard, split, ShardManifests, WorkerEvent, WorkerPool, WorkerSetup};

/// What pre-flight hands to the execution phase.
struct Plan {
    adapter: Arc<dyn PortalAdapter>,
    tasks: Vec<Task>,
    workers: usize,
}

pub struct Orchestrator {
    settings: Arc<Settings>,
    paths: PathResolver,
    adapters: AdapterRegistry,
    factory: Arc<dyn SessionFactory>,
    catalog: Option<Arc<MunicipalityCatalog>>,
}

impl Orchestrator {
    /// Production constructor: built-in adapters and chromedriver sessions.
    pub fn from_settings(settings: Settings, paths: PathResolver) -> Result<Self, ConfigError> {
        let adapters = AdapterRegistry::builtin(&settings)?;
        let factory = Arc::new(WebDriverFactory::new(settings.webdriver.clone()));
        Ok(Self::new(settings, paths, adapters, factory))
    }

    pub fn new(
        settings: Settings,
        paths: PathResolver,
        adapters: AdapterRegistry,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            paths,
            adapters,
            factory,
            catalog: None,
        }
    }

    /// Uses `catalog` instead of the process-wide one loaded from the
    /// resolved municipality file.
    pub fn with_catalog(mut self, catalog: Arc<MunicipalityCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn catalog(&self) -> Result<Arc<MunicipalityCatalog>, PreflightError> {
        match &self.catalog {
            Some(catalog) => Ok(Arc::clone(catalog)),
            None => Ok(catalog::global(self.paths.municipality_file())?),
        }
    }

    /// Runs `spec` to completion or cancellation.
    ///
    /// Only pre-flight failures come back as errors; anything that goes wrong
    /// once tasks run is recorded in the returned statistics.
    pub fn run(
        &self,
        spec: &JobSpec,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<RunStatistics, PreflightError> {
        let run_id = Uuid::new_v4().to_string();
        let _span = info_span!("run", run_id = %run_id, portal = %spec.portal).entered();

        let sink = ResultSink::new(&spec.output_root, Local::now().date_naive())
            .with_download_settings(&self.settings.download);
        let reporter = RunReporter::new(self.settings.report.include_success_list);

        progress.report(ProgressEvent::new(
            &run_id,
            RunPhase::Preflight,
            "Verificando configuração e municípios",
            0,
            0,
        ));
        let plan = match self.preflight(spec) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Pre-flight failed, nothing was started");
                let stats = RunStatistics::aborted(
                    &run_id,
                    spec.portal,
                    spec.period.clone(),
                    e.to_string(),
                );
                // Best effort: an unwritable root simply yields no report.
                reporter.write(&stats, &sink);
                progress.report(ProgressEvent::new(
                    &run_id,
                    RunPhase::Aborted,
                    e.to_string(),
                    0,
                    0,
                ));
                return Err(e);
            }
        };

        let total = plan.tasks.len();
        let mut stats = RunStatistics::new(&run_id, spec.portal, spec.period.clone(), total);
        info!(
            total,
            workers = plan.workers,
            period = %spec.period,
            "Starting run"
        );
        progress.report(ProgressEvent::new(
            &run_id,
            RunPhase::Starting,
            format!(
                "{}: {} município(s), período {}, modo {}",
                spec.portal.display_name(),
                total,
                spec.period,
                spec.mode
            ),
            0,
            total,
        ));

        let scratch = self.paths.run_scratch_dir(&run_id);
        let kills = KillRegistry::new();
        let watchdog = Watchdog::spawn(
            kills.clone(),
            cancel.clone(),
            self.settings.webdriver.kill_grace(),
        );
        let setup = WorkerSetup {
            adapter: plan.adapter,
            factory: Arc::clone(&self.factory),
            sink: sink.clone(),
            scratch: scratch.clone(),
            cancel: cancel.clone(),
            kills,
        };

        let mut tracker = EventTracker::new(&run_id, total, progress, cancel);
        if plan.workers == 1 {
            run_shard(1, plan.tasks, &setup, &mut |event| {
                tracker.handle(event, &mut stats);
                true
            });
        } else {
            self.run_parallel(plan.tasks, plan.workers, setup, &scratch, &mut tracker, &mut stats);
        }

        watchdog.stop();
        remove_scratch(&scratch);

        stats.finish(cancel.is_cancelled());
        progress.report(ProgressEvent::new(
            &run_id,
            RunPhase::Reporting,
            "Gerando relatório",
            stats.completed(),
            total,
        ));
        stats.report_path = reporter.write(&stats, &sink);

        let (phase, message) = match stats.outcome() {
            RunOutcome::Cancelled => (
                RunPhase::Cancelled,
                format!("Coleta cancelada: {} de {} concluídos", stats.completed(), total),
            ),
            RunOutcome::Partial => (
                RunPhase::Completed,
                format!("Coleta concluída com {} falha(s)", stats.failed),
            ),
            _ => (RunPhase::Completed, "Coleta concluída com sucesso".to_string()),
        };
        info!(
            succeeded = stats.succeeded,
            no_data = stats.no_data,
            failed = stats.failed,
            cancelled = stats.cancelled(),
            outcome = ?stats.outcome(),
            "Run finished"
        );
        progress.report(ProgressEvent::new(
            &run_id,
            phase,
            message,
            stats.completed(),
            total,
        ));
        Ok(stats)
    }

    fn preflight(&self, spec: &JobSpec) -> Result<Plan, PreflightError> {
        spec.validate_mode()?;
        spec.period.validate_for(spec.portal)?;
        let adapter = self
            .adapters
            .get(spec.portal)
            .ok_or(PreflightError::NoAdapter(spec.portal))?;

        let catalog = self.catalog()?;
        let names = spec.expand_target(&catalog)?;
        ensure_writable(&spec.output_root)?;

        let tasks: Vec<Task> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Task::new(i, spec.portal, spec.period.clone(), name))
            .collect();
        let workers = spec.effective_workers(tasks.len());
        debug!(tasks = tasks.len(), workers, "Pre-flight passed");

        Ok(Plan {
            adapter,
            tasks,
            workers,
        })
    }

    fn run_parallel(
        &self,
        tasks: Vec<Task>,
        workers: usize,
        setup: WorkerSetup,
        scratch: &Path,
        tracker: &mut EventTracker<'_>,
        stats: &mut RunStatistics,
    ) {
        let shards = split(&tasks, workers);
        for (i, shard) in shards.iter().enumerate() {
            debug!(
                worker = i + 1,
                size = shard.len(),
                first = shard.first().map(|t| t.municipality.as_str()).unwrap_or(""),
                "Shard assigned"
            );
        }

        let _manifests = if self.settings.run.write_shard_manifests {
            let names: Vec<Vec<String>> = shards
                .iter()
                .map(|s| s.iter().map(|t| t.municipality.clone()).collect())
                .collect();
            match ShardManifests::write(scratch, &names) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "Could not write shard manifests");
                    None
                }
            }
        } else {
            None
        };

        let pool = match WorkerPool::start(setup, shards) {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Worker pool did not start");
                for task in tasks {
                    let result = TaskResult::failed(
                        &task,
                        ErrorKind::Unexpected,
                        e.to_string(),
                        Started::now(),
                    );
                    tracker.handle(WorkerEvent::Finished(result), stats);
                }
                return;
            }
        };

        while let Some(event) = pool.recv_event() {
            tracker.handle(event, stats);
        }
        pool.wait();
    }
}

/// Turns worker events into statistics and progress events.
struct EventTracker<'a> {
    run_id: &'a str,
    total: usize,
    progress: &'a dyn ProgressReporter,
    cancel: &'a CancelToken,
    cancelling_announced: bool,
}

impl<'a> EventTracker<'a> {
    fn new(
        run_id: &'a str,
        total: usize,
        progress: &'a dyn ProgressReporter,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            run_id,
            total,
            progress,
            cancel,
            cancelling_announced: false,
        }
    }

    fn handle(&mut self, event: WorkerEvent, stats: &mut RunStatistics) {
        match event {
            WorkerEvent::Started(task) => {
                self.progress.report(
                    ProgressEvent::new(
                        self.run_id,
                        RunPhase::TaskStarted,
                        format!("Processando {}", task.municipality),
                        stats.completed(),
                        self.total,
                    )
                    .with_municipality(&task.municipality, task.worker_id),
                );
            }
            WorkerEvent::Finished(result) => {
                match result.status {
                    TaskStatus::Failed => warn!(
                        municipality = %result.task.municipality,
                        kind = ?result.error.as_ref().map(|e| e.kind),
                        "Task failed"
                    ),
                    _ => debug!(
                        municipality = %result.task.municipality,
                        status = %result.status,
                        output = result.output_path().map(|p| redact_path(p)).as_deref().unwrap_or(""),
                        "Task finished"
                    ),
                }
                let event = ProgressEvent::task_finished(
                    self.run_id,
                    &result,
                    stats.completed() + usize::from(result.status != TaskStatus::Cancelled),
                    self.total,
                );
                stats.record(result);
                self.progress.report(event);
            }
        }

        if self.cancel.is_cancelled() && !self.cancelling_announced {
            self.cancelling_announced = true;
            info!("Cancellation requested, stopping workers");
            self.progress.report(ProgressEvent::new(
                self.run_id,
                RunPhase::Cancelling,
                "Cancelando: aguardando o encerramento dos navegadores",
                stats.completed(),
                self.total,
            ));
        }
    }
}

/// Creates `root` if needed and proves a file can be written there.
fn ensure_writable(root: &Path) -> Result<(), PreflightError> {
    let unwritable = |source| PreflightError::OutputRootUnwritable {
        path: root.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(root).map_err(unwritable)?;
    let probe = root.join(format!(".coletor-probe-{}", Uuid::new_v4()));
    std::fs::write(&probe, b"").map_err(unwritable)?;
    if let Err(e) = std::fs::remove_file(&probe) {
        debug!(error = %e, "Could not remove write probe");
    }
    Ok(())
}

fn remove_scratch(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Could not remove run scratch directory");
    }
}
