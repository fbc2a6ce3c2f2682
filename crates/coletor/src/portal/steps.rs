//! Attempt loop and form helpers shared by the adapters.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, warn};

use super::matching::match_option;
use crate::config::{FieldInput, FieldSource, PortalSettings};
use crate::error::{AdapterError, SessionError};
use crate::job::{Started, Task, TaskResult};
use crate::session::{BrowserSession, Locator, SessionSlot};
use crate::sink::table::contains_marker;

/// What one successful attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Saved(Vec<PathBuf>),
    /// The portal reported no records. May still carry files written by
    /// other pages of the same task.
    NoData(Vec<PathBuf>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub attempts: u32,
    pub pause: Duration,
    /// Start every retry from a new browser, not only after a fatal error.
    pub rebuild_on_retry: bool,
    /// Start every task from a new browser.
    pub fresh_session: bool,
}

impl AttemptPolicy {
    pub fn for_portal(settings: &PortalSettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            pause: settings.pauses.retry(),
            rebuild_on_retry: false,
            fresh_session: settings.fresh_session_per_task,
        }
    }

    pub fn rebuilding_on_retry(mut self) -> Self {
        self.rebuild_on_retry = true;
        self
    }
}

/// Runs `body` against the slot's session until it succeeds, fails for a
/// reason a retry cannot fix, or attempts run out.
///
/// Every attempt starts from the portal's landing page (`body` navigates
/// there first). A lost browser is replaced before the next attempt.
pub fn attempt_loop<F>(
    slot: &mut SessionSlot,
    policy: &AttemptPolicy,
    mut body: F,
) -> Result<Outcome, AdapterError>
where
    F: FnMut(&mut BrowserSession) -> Result<Outcome, AdapterError>,
{
    let attempts = policy.attempts.max(1);
    let mut rebuild = policy.fresh_session && slot.opened() > 0;
    let mut last_error = None;

    for attempt in 1..=attempts {
        if slot.cancel_token().is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }

        let session = if rebuild {
            slot.rebuild()
        } else {
            slot.session()
        };
        let outcome = match session {
            Ok(session) => body(session),
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_cancelled() || !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(
                    session = slot.label(),
                    attempt,
                    attempts,
                    error = %e,
                    "Attempt failed"
                );
                rebuild = e.is_fatal() || policy.rebuild_on_retry;
                last_error = Some(e);
            }
        }

        if attempt < attempts && !slot.cancel_token().sleep(policy.pause) {
            return Err(SessionError::Cancelled.into());
        }
    }

    Err(last_error.unwrap_or_else(|| {
        AdapterError::Session(SessionError::Startup("no attempt was made".to_string()))
    }))
}

/// Folds an attempt loop's result into the task's result.
pub fn finish(task: &Task, started: Started, result: Result<Outcome, AdapterError>) -> TaskResult {
    match result {
        Ok(Outcome::Saved(outputs)) => TaskResult::succeeded(task, outputs, started).verified(),
        Ok(Outcome::NoData(outputs)) => TaskResult::no_data(task, outputs, started),
        Err(e) if e.is_cancelled() => TaskResult::cancelled(task, started),
        Err(e) => TaskResult::failed(task, e.kind(), e.to_string(), started),
    }
}

/// Fills `{year}` and `{month}` placeholders of a portal URL.
pub fn expand_url(template: &str, task: &Task) -> String {
    let mut url = template.to_string();
    if let Some(year) = task.period.year() {
        url = url.replace("{year}", &year.to_string());
    }
    if let Some(month) = task.period.month() {
        url = url.replace("{month}", &format!("{:02}", month));
    }
    url
}

/// Value a configured form field takes for `task`. `None` when the task's
/// period does not provide it.
pub fn field_value(source: &FieldSource, task: &Task) -> Option<String> {
    match source {
        FieldSource::Year => task.period.year().map(|y| y.to_string()),
        FieldSource::Month => task.period.month().map(|m| format!("{:02}", m)),
        FieldSource::Municipality => Some(task.municipality.clone()),
        FieldSource::Fixed(value) => Some(value.clone()),
    }
}

/// Selects the dropdown option matching `municipality`.
///
/// With `await_options`, first waits for the dropdown to be repopulated by
/// the field before it. The options are read once; no match means the portal
/// does not offer this municipality.
pub fn select_municipality(
    session: &mut BrowserSession,
    locator: &Locator,
    municipality: &str,
    await_options: Option<Duration>,
) -> Result<(), AdapterError> {
    let options = match await_options {
        Some(budget) => session.wait_for_options(locator, 2, budget)?,
        None => session.options(locator)?,
    };
    let option = match_option(&options, municipality)
        .ok_or_else(|| AdapterError::MunicipalityNotFound(municipality.to_string()))?;
    debug!(%locator, value = %option.value, text = %option.text, "Municipality option chosen");
    session.select_by_value(locator, &option.value)?;
    Ok(())
}

/// Enters `value` into a field the way its configuration says.
pub fn enter_value(
    session: &mut BrowserSession,
    locator: &Locator,
    input: FieldInput,
    value: &str,
    await_options: Option<Duration>,
) -> Result<(), AdapterError> {
    session.checkpoint()?;
    match input {
        FieldInput::SelectMatch => select_municipality(session, locator, value, await_options)?,
        FieldInput::SelectValue | FieldInput::SelectText => {
            if let Some(budget) = await_options {
                session.wait_for_options(locator, 2, budget)?;
            }
            if input == FieldInput::SelectValue {
                session.select_by_value(locator, value)?;
            } else {
                session.select_by_visible_text(locator, value)?;
            }
        }
        FieldInput::Type => session.fill(locator, value)?,
    }
    Ok(())
}

/// Clicks `trigger` and waits for the resulting file to settle in the
/// session's download directory.
pub fn download_via(
    session: &mut BrowserSession,
    trigger: &Locator,
    ready_budget: Duration,
    settle_budget: Duration,
) -> Result<PathBuf, AdapterError> {
    session.find_when_ready(trigger, Some(ready_budget))?;
    session.clear_downloads()?;
    let before = session.snapshot_downloads()?;
    session.click(trigger)?;
    session.checkpoint()?;
    Ok(session.settle_download(&before, settle_budget)?)
}

/// [`download_via`], clicking the trigger again while no file shows up, at
/// most `attempts` times.
pub fn download_retrying(
    session: &mut BrowserSession,
    trigger: &Locator,
    ready_budget: Duration,
    settle_budget: Duration,
    attempts: u32,
) -> Result<PathBuf, AdapterError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match download_via(session, trigger, ready_budget, settle_budget) {
            Err(AdapterError::Session(SessionError::DownloadTimeout { waited, .. }))
                if attempt < attempts =>
            {
                warn!(
                    session = session.label(),
                    attempt,
                    attempts,
                    waited_secs = waited.as_secs(),
                    "Download never appeared, clicking again"
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Runs one adapter step inside its own span.
pub fn step<T>(
    name: &'static str,
    f: impl FnOnce() -> Result<T, AdapterError>,
) -> Result<T, AdapterError> {
    let _span = debug_span!("step", name).entered();
    let result = f();
    if let Err(e) = &result {
        debug!(error = %e, "Step failed");
    }
    result
}

/// Waits for either the results element or one of the "no records" markers.
///
/// Returns the page source when results are shown, `None` when the portal
/// reported an empty result.
pub fn await_results(
    session: &mut BrowserSession,
    results: &Locator,
    empty_markers: &[String],
    budget: Duration,
) -> Result<Option<String>, AdapterError> {
    let started = Instant::now();
    loop {
        session.checkpoint()?;
        let shown = session.appears_within(results, Duration::ZERO)?;
        let html = session.page_source()?;
        if contains_marker(&html, empty_markers) {
            return Ok(None);
        }
        if shown {
            return Ok(Some(html));
        }
        if started.elapsed() >= budget {
            return Err(SessionError::ElementTimeout {
                locator: results.to_string(),
                waited: started.elapsed(),
            }
            .into());
        }
        session.pause(session.policy().poll)?;
    }
}
