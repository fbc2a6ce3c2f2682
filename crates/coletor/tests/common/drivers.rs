//! Browser stand-ins plugged in through the public `SessionFactory` and
//! `Driver` seams.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coletor::cancel::CancelToken;
use coletor::error::SessionError;
use coletor::job::{ErrorKind, Portal, Started, Task, TaskResult};
use coletor::portal::{AdapterContext, PortalAdapter, SessionNeed, MAIN_SIDE};
use coletor::session::{
    BrowserSession, Driver, DriverError, ElementState, InteractionPolicy, KillSwitch, Locator,
    SelectOption, SessionFactory, SessionSpec,
};

#[derive(Default)]
struct FactoryState {
    opened: AtomicUsize,
    killed: AtomicUsize,
    /// Download directories of sessions that are currently alive.
    live: Mutex<HashSet<PathBuf>>,
    shared_dir_seen: AtomicBool,
    labels: Mutex<Vec<String>>,
    visits: Mutex<Vec<String>>,
}

impl FactoryState {
    fn release(&self, dir: &PathBuf) {
        self.live.lock().unwrap().remove(dir);
    }
}

/// Opens [`NullDriver`]s and checks that no two live sessions share a
/// download directory.
#[derive(Clone, Default)]
pub struct NullFactory {
    state: Arc<FactoryState>,
}

impl NullFactory {
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> usize {
        self.state.killed.load(Ordering::SeqCst)
    }

    pub fn shared_dir_seen(&self) -> bool {
        self.state.shared_dir_seen.load(Ordering::SeqCst)
    }

    pub fn labels(&self) -> Vec<String> {
        self.state.labels.lock().unwrap().clone()
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.visits.lock().unwrap().clone()
    }
}

impl SessionFactory for NullFactory {
    fn open(
        &self,
        spec: &SessionSpec,
        cancel: &CancelToken,
    ) -> Result<BrowserSession, SessionError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.labels.lock().unwrap().push(spec.label.clone());
        if !self
            .state
            .live
            .lock()
            .unwrap()
            .insert(spec.download_dir.clone())
        {
            self.state.shared_dir_seen.store(true, Ordering::SeqCst);
        }

        let driver = NullDriver {
            state: Arc::clone(&self.state),
            dir: spec.download_dir.clone(),
        };
        BrowserSession::new(spec, Box::new(driver), cancel.clone())
    }
}

/// Every element exists and is ready; every action succeeds.
pub struct NullDriver {
    state: Arc<FactoryState>,
    dir: PathBuf,
}

impl Driver for NullDriver {
    fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.state.visits.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn probe(&mut self, _locator: &Locator) -> Result<Option<ElementState>, DriverError> {
        Ok(Some(ElementState::READY))
    }

    fn click(&mut self, _locator: &Locator) -> Result<(), DriverError> {
        Ok(())
    }

    fn clear(&mut self, _locator: &Locator) -> Result<(), DriverError> {
        Ok(())
    }

    fn send_keys(&mut self, _locator: &Locator, _text: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn select_by_value(&mut self, _locator: &Locator, _value: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn select_by_text(&mut self, _locator: &Locator, _text: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn options(&mut self, _locator: &Locator) -> Result<Vec<SelectOption>, DriverError> {
        Ok(vec![])
    }

    fn text(&mut self, _locator: &Locator) -> Result<String, DriverError> {
        Ok(String::new())
    }

    fn page_source(&mut self) -> Result<String, DriverError> {
        Ok("<html><body></body></html>".to_string())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        self.state.release(&self.dir);
        Ok(())
    }

    fn kill_switch(&self) -> Option<KillSwitch> {
        let state = Arc::clone(&self.state);
        let dir = self.dir.clone();
        Some(KillSwitch::new(dir.display().to_string(), move || {
            state.killed.fetch_add(1, Ordering::SeqCst);
            state.release(&dir);
        }))
    }
}

/// Navigates once per task and writes `<MUNICIPALITY>.txt`.
///
/// Municipalities listed in `failing` fail with `MunicipalityNotFound`,
/// those in `empty` yield no data.
pub struct FileAdapter {
    pub portal: Portal,
    pub delay: Duration,
    pub failing: Vec<String>,
    pub empty: Vec<String>,
}

impl FileAdapter {
    pub fn new(portal: Portal) -> Self {
        Self {
            portal,
            delay: Duration::ZERO,
            failing: vec![],
            empty: vec![],
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, names: &[&str]) -> Self {
        self.failing = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn empty(mut self, names: &[&str]) -> Self {
        self.empty = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn run(&self, task: &Task, ctx: &mut AdapterContext<'_>) -> Result<TaskResult, SessionError> {
        let started = Started::now();
        let session = ctx.sessions.slot(0)?.session()?;
        session.open(
            &format!("https://portal.test/{}", task.municipality),
            &Locator::css("body"),
            Duration::from_secs(1),
        )?;
        if !session.cancel_token().sleep(self.delay) {
            return Ok(TaskResult::cancelled(task, started));
        }

        if self.failing.contains(&task.municipality) {
            return Ok(TaskResult::failed(
                task,
                ErrorKind::MunicipalityNotFound,
                format!("'{}' not offered", task.municipality),
                started,
            ));
        }
        if self.empty.contains(&task.municipality) {
            return Ok(TaskResult::no_data(task, vec![], started));
        }

        let name = format!("{}.txt", task.municipality.replace(' ', "_"));
        let path = ctx
            .sink
            .write_bytes(task.municipality.as_bytes(), self.portal, None, &name)
            .map_err(|e| SessionError::BrowserFatal(e.to_string()))?;
        Ok(TaskResult::succeeded(task, vec![path], started).verified())
    }
}

impl PortalAdapter for FileAdapter {
    fn portal(&self) -> Portal {
        self.portal
    }

    fn sessions(&self) -> Vec<SessionNeed> {
        vec![SessionNeed {
            side: MAIN_SIDE.to_string(),
            relaxed_tls: false,
            policy: InteractionPolicy {
                wait: Duration::from_millis(200),
                poll: Duration::from_millis(5),
                retry_pause: Duration::from_millis(5),
                ..InteractionPolicy::default()
            },
        }]
    }

    fn execute(&self, task: &Task, ctx: &mut AdapterContext<'_>) -> TaskResult {
        let started = Started::now();
        match self.run(task, ctx) {
            Ok(result) => result,
            Err(SessionError::Cancelled) => TaskResult::cancelled(task, started),
            Err(e) => TaskResult::failed(task, e.kind(), e.to_string(), started),
        }
    }
}
