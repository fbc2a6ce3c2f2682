use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::kill::KillRegistry;
use super::BrowserSession;
use crate::cancel::CancelToken;
use crate::error::SessionError;

/// Waiting and retry behaviour of a session's convenience primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionPolicy {
    /// Default budget for an element to become ready.
    pub wait: Duration,
    /// Interval between element probes.
    pub poll: Duration,
    /// Attempts per element action.
    pub attempts: u32,
    pub retry_pause: Duration,
    /// Interval over which a download's size must not change.
    pub settle_sample: Duration,
    /// Suffixes of in-progress download files.
    pub partial_suffixes: Vec<String>,
}

impl Default for InteractionPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            poll: Duration::from_millis(250),
            attempts: 3,
            retry_pause: Duration::from_secs(1),
            settle_sample: Duration::from_secs(1),
            partial_suffixes: vec![
                ".crdownload".to_string(),
                ".tmp".to_string(),
                ".part".to_string(),
            ],
        }
    }
}

impl InteractionPolicy {
    /// Millisecond-scale timings for tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            wait: Duration::from_millis(200),
            poll: Duration::from_millis(5),
            attempts: 3,
            retry_pause: Duration::from_millis(5),
            settle_sample: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

/// Everything needed to start one browser session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Human-readable name used in logs and the kill registry, e.g. `w2-saldo`.
    pub label: String,
    /// Absolute, exclusive to this session.
    pub download_dir: PathBuf,
    /// Accept invalid certificates and allow insecure content.
    pub relaxed_tls: bool,
    pub policy: InteractionPolicy,
}

impl SessionSpec {
    pub fn new(label: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            download_dir: download_dir.into(),
            relaxed_tls: false,
            policy: InteractionPolicy::default(),
        }
    }

    pub fn with_relaxed_tls(mut self, relaxed: bool) -> Self {
        self.relaxed_tls = relaxed;
        self
    }

    pub fn with_policy(mut self, policy: InteractionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Starts browser sessions. The production implementation launches
/// chromedriver; tests plug in scripted drivers.
pub trait SessionFactory: Send + Sync {
    fn open(&self, spec: &SessionSpec, cancel: &CancelToken)
        -> Result<BrowserSession, SessionError>;
}

/// One session position owned by a worker, opened lazily and rebuildable in
/// place.
pub struct SessionSlot {
    spec: SessionSpec,
    factory: Arc<dyn SessionFactory>,
    cancel: CancelToken,
    kills: KillRegistry,
    session: Option<BrowserSession>,
    opened: usize,
}

impl SessionSlot {
    pub fn new(
        spec: SessionSpec,
        factory: Arc<dyn SessionFactory>,
        cancel: CancelToken,
        kills: KillRegistry,
    ) -> Self {
        Self {
            spec,
            factory,
            cancel,
            kills,
            session: None,
            opened: 0,
        }
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// How many browsers this slot has started so far.
    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn start(&mut self) -> Result<BrowserSession, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let session = self.factory.open(&self.spec, &self.cancel)?;
        if let Some(switch) = session.kill_switch() {
            self.kills.register(&self.spec.label, switch);
        }
        self.opened += 1;
        debug!(session = %self.spec.label, opened = self.opened, "Session started");
        Ok(session)
    }

    /// The live session, starting one if needed.
    pub fn session(&mut self) -> Result<&mut BrowserSession, SessionError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.start()?,
        };
        Ok(self.session.insert(session))
    }

    /// Closes the current browser (if any) and starts a fresh one.
    pub fn rebuild(&mut self) -> Result<&mut BrowserSession, SessionError> {
        info!(session = %self.spec.label, "Rebuilding browser session");
        self.discard(false);
        self.session()
    }

    /// Closes the current browser; the next [`session`](Self::session) call
    /// starts a new one.
    pub fn discard(&mut self, force: bool) {
        if let Some(mut session) = self.session.take() {
            session.close(force);
            self.kills.unregister(&self.spec.label);
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.discard(false);
    }
}

/// The sessions a worker needs for one adapter: one per portal side.
pub struct SessionSet {
    slots: Vec<SessionSlot>,
}

impl SessionSet {
    pub fn new(
        specs: Vec<SessionSpec>,
        factory: Arc<dyn SessionFactory>,
        cancel: &CancelToken,
        kills: &KillRegistry,
    ) -> Self {
        let slots = specs
            .into_iter()
            .map(|spec| {
                SessionSlot::new(spec, Arc::clone(&factory), cancel.clone(), kills.clone())
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&mut self, index: usize) -> Result<&mut SessionSlot, SessionError> {
        self.slots.get_mut(index).ok_or_else(|| {
            SessionError::Startup(format!("no session slot at position {}", index))
        })
    }

    pub fn slots_mut(&mut self) -> &mut [SessionSlot] {
        &mut self.slots
    }

    /// Starts every slot's browser up front.
    pub fn open_all(&mut self) -> Result<(), SessionError> {
        for slot in &mut self.slots {
            slot.session()?;
        }
        Ok(())
    }

    pub fn close_all(&mut self, force: bool) {
        for slot in &mut self.slots {
            slot.discard(force);
        }
    }
}
