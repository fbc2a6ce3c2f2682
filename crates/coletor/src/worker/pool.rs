use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::cancel::CancelToken;
use crate::error::WorkerError;
use crate::job::{Task, TaskResult};
use crate::portal::{session_specs, AdapterContext, PortalAdapter};
use crate::session::{KillRegistry, SessionFactory, SessionSet};
use crate::sink::ResultSink;

/// Everything a worker shares with the rest of the run.
#[derive(Clone)]
pub struct WorkerSetup {
    pub adapter: Arc<dyn PortalAdapter>,
    pub factory: Arc<dyn SessionFactory>,
    pub sink: ResultSink,
    /// Parent of every session's download directory.
    pub scratch: PathBuf,
    pub cancel: CancelToken,
    pub kills: KillRegistry,
}

/// What a worker reports while it walks its shard.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started(Task),
    Finished(TaskResult),
}

/// Runs one shard to completion (or cancellation) on the calling thread.
///
/// `worker_id` is 1-based and names the worker's sessions. `emit` receives
/// every event and returns `false` when nobody listens any more.
pub fn run_shard(
    worker_id: usize,
    shard: Vec<Task>,
    setup: &WorkerSetup,
    emit: &mut dyn FnMut(WorkerEvent) -> bool,
) {
    debug!("Worker {} started with {} tasks", worker_id, shard.len());

    let specs = session_specs(setup.adapter.as_ref(), &setup.scratch, worker_id);
    let mut sessions = SessionSet::new(
        specs,
        Arc::clone(&setup.factory),
        &setup.cancel,
        &setup.kills,
    );

    for task in shard {
        if setup.cancel.is_cancelled() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }
        let task = task.assigned_to(worker_id);
        if !emit(WorkerEvent::Started(task.clone())) {
            break;
        }

        let mut ctx = AdapterContext {
            sessions: &mut sessions,
            sink: &setup.sink,
        };
        let result = setup.adapter.execute(&task, &mut ctx);

        if !emit(WorkerEvent::Finished(result)) {
            error!("Worker {} failed to send result", worker_id);
            break;
        }
    }

    sessions.close_all(setup.cancel.is_cancelled());
    debug!("Worker {} stopped", worker_id);
}

/// One thread per shard, each with its own sessions, reporting through a
/// shared channel.
pub struct WorkerPool {
    event_receiver: Receiver<WorkerEvent>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelToken,
}

impl WorkerPool {
    /// Starts one worker per shard. Worker `i` (1-based) gets `shards[i - 1]`.
    pub fn start(setup: WorkerSetup, shards: Vec<Vec<Task>>) -> Result<Self, WorkerError> {
        if shards.is_empty() {
            return Err(WorkerError::SpawnFailed("no shards to run".to_string()));
        }
        let worker_count = shards.len();
        let (event_sender, event_receiver) = bounded::<WorkerEvent>(worker_count * 2);
        let setup = Arc::new(setup);
        let cancel = setup.cancel.clone();

        let mut workers = Vec::with_capacity(worker_count);
        for (index, shard) in shards.into_iter().enumerate() {
            let worker_id = index + 1;
            let sender = event_sender.clone();
            let worker_setup = Arc::clone(&setup);

            let handle = thread::Builder::new()
                .name(format!("coletor-w{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, shard, &worker_setup, sender);
                })
                .map_err(|e| {
                    // Stop the workers that did start.
                    cancel.cancel();
                    WorkerError::SpawnFailed(e.to_string())
                })?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            event_receiver,
            workers,
            cancel,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Next event from any worker; `None` once every worker has stopped.
    pub fn recv_event(&self) -> Option<WorkerEvent> {
        self.event_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn wait(self) {
        // Unblock workers stuck on a full channel
        drop(self.event_receiver);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i + 1, e);
            } else {
                debug!("Worker {} finished", i + 1);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    shard: Vec<Task>,
    setup: &WorkerSetup,
    sender: Sender<WorkerEvent>,
) {
    run_shard(worker_id, shard, setup, &mut |event| sender.send(event).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Period, Portal, Started, TaskStatus};
    use crate::portal::{SessionNeed, MAIN_SIDE};
    use crate::session::fake::FakeFactory;
    use crate::session::InteractionPolicy;
    use crate::worker::partition::split;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records which session label handled which municipality.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, String)>>,
        delay: Duration,
    }

    impl PortalAdapter for Recording {
        fn portal(&self) -> Portal {
            Portal::HealthFundBalance
        }

        fn sessions(&self) -> Vec<SessionNeed> {
            vec![SessionNeed {
                side: MAIN_SIDE.to_string(),
                relaxed_tls: false,
                policy: InteractionPolicy::fast(),
            }]
        }

        fn execute(&self, task: &Task, ctx: &mut AdapterContext<'_>) -> TaskResult {
            let started = Started::now();
            let slot = ctx.sessions.slot(0).unwrap();
            let session = slot.session().unwrap();
            if !session.cancel_token().sleep(self.delay) {
                return TaskResult::cancelled(task, started);
            }
            self.seen
                .lock()
                .unwrap()
                .push((session.label().to_string(), task.municipality.clone()));
            TaskResult::no_data(task, vec![], started)
        }
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(i, Portal::HealthFundBalance, Period::None, format!("M{:02}", i)))
            .collect()
    }

    fn setup(tmp: &TempDir, adapter: Arc<Recording>, cancel: CancelToken) -> WorkerSetup {
        WorkerSetup {
            adapter,
            factory: Arc::new(FakeFactory::default()),
            sink: ResultSink::new(
                tmp.path().join("out"),
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ),
            scratch: tmp.path().join("scratch"),
            cancel,
            kills: KillRegistry::new(),
        }
    }

    #[test]
    fn test_every_task_runs_once_on_its_own_worker() {
        let tmp = TempDir::new().unwrap();
        let adapter = Arc::new(Recording::default());
        let shards = split(&tasks(7), 3);
        let pool = WorkerPool::start(
            setup(&tmp, Arc::clone(&adapter), CancelToken::new()),
            shards.clone(),
        )
        .unwrap();
        assert_eq!(pool.len(), 3);

        let mut finished = Vec::new();
        while let Some(event) = pool.recv_event() {
            if let WorkerEvent::Finished(result) = event {
                finished.push(result);
            }
        }
        pool.wait();

        assert_eq!(finished.len(), 7);
        assert!(finished.iter().all(|r| r.status == TaskStatus::NoData));
        let indices: BTreeSet<usize> = finished.iter().map(|r| r.task.index).collect();
        assert_eq!(indices.len(), 7);

        // Shard membership decides the worker.
        for result in &finished {
            let shard = shards
                .iter()
                .position(|s| s.iter().any(|t| t.index == result.task.index))
                .unwrap();
            assert_eq!(result.task.worker_id, shard + 1);
        }
        let seen = adapter.seen.lock().unwrap();
        assert!(seen.iter().any(|(label, m)| label == "w3-main" && m == "M06"));
    }

    #[test]
    fn test_shutdown_stops_remaining_tasks() {
        let tmp = TempDir::new().unwrap();
        let adapter = Arc::new(Recording {
            delay: Duration::from_millis(50),
            ..Recording::default()
        });
        let cancel = CancelToken::new();
        let pool = WorkerPool::start(
            setup(&tmp, adapter, cancel.clone()),
            split(&tasks(40), 2),
        )
        .unwrap();

        let mut finished = 0;
        while let Some(event) = pool.recv_event() {
            if let WorkerEvent::Finished(_) = event {
                finished += 1;
                if finished == 2 {
                    pool.shutdown();
                }
            }
        }
        assert!(pool.is_shutdown());
        pool.wait();
        assert!(finished < 40);
    }

    #[test]
    fn test_run_shard_inline() {
        let tmp = TempDir::new().unwrap();
        let adapter = Arc::new(Recording::default());
        let setup = setup(&tmp, Arc::clone(&adapter), CancelToken::new());

        let mut events = Vec::new();
        run_shard(1, tasks(3), &setup, &mut |event| {
            events.push(event);
            true
        });
        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], WorkerEvent::Started(ref t) if t.worker_id == 1));
    }
}
