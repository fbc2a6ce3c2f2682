//! Portals whose data is split across form pages that must be queried side by
//! side for the same municipality.
//!
//! Every side has its own session and download directory and runs in its own
//! thread. The sides are joined before the worker moves to the next task, and
//! the task succeeds only when every side does.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info_span, warn, Span};

use super::steps::{
    self, download_retrying, enter_value, expand_url, field_value, step, AttemptPolicy, Outcome,
};
use super::{AdapterContext, PortalAdapter, SessionNeed};
use crate::config::{DownloadSettings, Pauses, PortalSettings, SideSettings, Timeouts};
use crate::error::{AdapterError, ConfigError, SessionError};
use crate::job::{ErrorKind, Portal, Started, Task, TaskResult};
use crate::sanitize::file_stem;
use crate::session::{BrowserSession, InteractionPolicy, SessionSlot};
use crate::sink::ResultSink;

#[derive(Debug, Clone)]
pub struct DualPageAdapter {
    portal: Portal,
    sides: Vec<SideSettings>,
    timeouts: Timeouts,
    pauses: Pauses,
    download_attempts: u32,
    settle_timeout: Duration,
    attempts: AttemptPolicy,
    policy: InteractionPolicy,
    relaxed_tls: bool,
    reset_after_task: bool,
}

impl DualPageAdapter {
    pub fn new(
        portal: Portal,
        settings: &PortalSettings,
        download: &DownloadSettings,
    ) -> Result<Self, ConfigError> {
        if settings.sides.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{} needs at least one side", portal),
            });
        }
        let mut names: Vec<&str> = settings.sides.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != settings.sides.len() {
            return Err(ConfigError::Validation {
                message: format!("{} has two sides with the same name", portal),
            });
        }

        Ok(Self {
            portal,
            sides: settings.sides.clone(),
            timeouts: settings.timeouts.clone(),
            pauses: settings.pauses.clone(),
            download_attempts: settings.download_attempts.max(1),
            settle_timeout: download.settle_timeout(),
            attempts: AttemptPolicy::for_portal(settings).rebuilding_on_retry(),
            policy: settings.interaction_policy(download),
            relaxed_tls: settings.relaxed_tls,
            reset_after_task: settings.reset_after_task,
        })
    }

    pub fn side_names(&self) -> Vec<&str> {
        self.sides.iter().map(|s| s.name.as_str()).collect()
    }

    fn fill_form(
        &self,
        side: &SideSettings,
        session: &mut BrowserSession,
        task: &Task,
    ) -> Result<(), AdapterError> {
        for field in &side.fields {
            let Some(value) = field_value(&field.source, task) else {
                if field.optional {
                    continue;
                }
                return Err(ConfigError::Validation {
                    message: format!(
                        "field {} of side '{}' needs a value the period '{}' does not carry",
                        field.locator, side.name, task.period
                    ),
                }
                .into());
            };

            if field.optional
                && !session.appears_within(&field.locator, self.pauses.optional_probe())?
            {
                debug!(field = %field.locator, "Optional field absent");
                continue;
            }

            let await_options = field.await_options.then(|| self.timeouts.dependent());
            enter_value(session, &field.locator, field.input, &value, await_options)?;
        }
        Ok(())
    }

    fn run_side(
        &self,
        side: &SideSettings,
        session: &mut BrowserSession,
        task: &Task,
        sink: &ResultSink,
    ) -> Result<Outcome, AdapterError> {
        step("landing", || {
            let url = expand_url(&side.url, task);
            Ok(session.open(&url, &side.landing, self.timeouts.landing())?)
        })?;

        step("form", || {
            self.fill_form(side, session, task)?;
            if let Some(submit) = &side.submit {
                session.click(submit)?;
            }
            let pause = side
                .post_submit_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.pauses.post_submit());
            Ok(session.pause(pause)?)
        })?;

        if let Some(probe) = &side.empty_probe {
            if session.appears_within(probe, self.pauses.empty_probe())? {
                debug!("Portal reports no records");
                return Ok(Outcome::NoData(vec![]));
            }
        }

        let downloaded = step("download", || {
            download_retrying(
                session,
                &side.download,
                self.timeouts.download(),
                self.settle_timeout,
                self.download_attempts,
            )
        })?;
        let stored = sink.store_download(
            &downloaded,
            self.portal,
            Some(&side.name),
            &file_stem(&task.municipality),
        )?;
        Ok(Outcome::Saved(vec![stored]))
    }

    /// Runs every side in its own thread and waits for all of them.
    fn run_sides(
        &self,
        slots: &mut [SessionSlot],
        task: &Task,
        sink: &ResultSink,
    ) -> Vec<Result<Outcome, AdapterError>> {
        let parent = Span::current();
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .sides
                .iter()
                .zip(slots.iter_mut())
                .map(|(side, slot)| {
                    let parent = parent.clone();
                    scope.spawn(move || {
                        let _parent = parent.enter();
                        let _span = info_span!("side", side = %side.name).entered();
                        steps::attempt_loop(slot, &self.attempts, |session| {
                            self.run_side(side, session, task, sink)
                        })
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(SessionError::BrowserFatal("side thread panicked".to_string()).into())
                    })
                })
                .collect()
        })
    }

    /// Sends every open session back to its landing page so the next task
    /// starts from a clean form.
    fn reset_sessions(&self, slots: &mut [SessionSlot], task: &Task) {
        for (side, slot) in self.sides.iter().zip(slots.iter_mut()) {
            if !slot.is_open() || slot.cancel_token().is_cancelled() {
                continue;
            }
            let url = expand_url(&side.url, task);
            let reset = slot
                .session()
                .and_then(|session| session.open(&url, &side.landing, self.timeouts.landing()));
            if let Err(e) = reset {
                warn!(side = %side.name, error = %e, "Could not reset session, discarding it");
                slot.discard(true);
            }
        }
    }
}

/// Folds the per-side results: any cancellation cancels the task, any
/// failure fails it, otherwise it succeeded when at least one side saved.
/// A task that does not complete keeps none of its sides' files.
fn combine(
    sides: &[SideSettings],
    results: Vec<Result<Outcome, AdapterError>>,
    sink: &ResultSink,
) -> Result<Outcome, AdapterError> {
    let mut outputs: Vec<PathBuf> = Vec::new();
    let mut saved = false;
    let mut cancelled = None;
    let mut failure = None;

    for (side, result) in sides.iter().zip(results) {
        match result {
            Ok(Outcome::Saved(files)) => {
                saved = true;
                outputs.extend(files);
            }
            Ok(Outcome::NoData(files)) => outputs.extend(files),
            Err(e) if e.is_cancelled() => {
                cancelled.get_or_insert(e);
            }
            Err(e) => {
                warn!(side = %side.name, error = %e, "Side failed");
                failure.get_or_insert(e);
            }
        }
    }

    match cancelled.or(failure) {
        Some(e) => {
            sink.discard(&outputs);
            Err(e)
        }
        None if saved => Ok(Outcome::Saved(outputs)),
        None => Ok(Outcome::NoData(outputs)),
    }
}

impl PortalAdapter for DualPageAdapter {
    fn portal(&self) -> Portal {
        self.portal
    }

    fn sessions(&self) -> Vec<SessionNeed> {
        self.sides
            .iter()
            .map(|side| SessionNeed {
                side: side.name.clone(),
                relaxed_tls: self.relaxed_tls,
                policy: self.policy.clone(),
            })
            .collect()
    }

    fn execute(&self, task: &Task, ctx: &mut AdapterContext<'_>) -> TaskResult {
        let _span = info_span!(
            "task",
            portal = %task.portal,
            municipality = %task.municipality,
            worker = task.worker_id
        )
        .entered();
        let started = Started::now();

        let slots = ctx.sessions.slots_mut();
        if slots.len() != self.sides.len() {
            return TaskResult::failed(
                task,
                ErrorKind::Unexpected,
                format!(
                    "{} sessions provided for {} sides",
                    slots.len(),
                    self.sides.len()
                ),
                started,
            );
        }

        let results = self.run_sides(slots, task, ctx.sink);
        let result = combine(&self.sides, results, ctx.sink);
        if self.reset_after_task {
            self.reset_sessions(slots, task);
        }
        steps::finish(task, started, result)
    }
}
