//! Browser sessions: one controlled browser plus its exclusive download
//! directory.
//!
//! All waiting, re-resolution of stale elements and download settling lives
//! here so adapters can be written as a linear list of steps.

pub mod driver;
pub mod factory;
pub mod kill;
pub mod locator;
pub mod webdriver;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::SessionError;
use crate::sanitize::redact_path;

pub use driver::{Driver, DriverError, ElementState, KillSwitch, SelectOption, KEY_ESCAPE};
pub use factory::{InteractionPolicy, SessionFactory, SessionSet, SessionSlot, SessionSpec};
pub use kill::KillRegistry;
pub use locator::Locator;
pub use webdriver::WebDriverFactory;

/// File names present in a download directory at some instant.
#[derive(Debug, Clone, Default)]
pub struct DownloadSnapshot {
    names: HashSet<String>,
}

impl DownloadSnapshot {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub struct BrowserSession {
    label: String,
    driver: Box<dyn Driver>,
    download_dir: PathBuf,
    policy: InteractionPolicy,
    cancel: CancelToken,
    closed: bool,
}

impl BrowserSession {
    pub fn new(
        spec: &SessionSpec,
        driver: Box<dyn Driver>,
        cancel: CancelToken,
    ) -> Result<Self, SessionError> {
        std::fs::create_dir_all(&spec.download_dir).map_err(|e| SessionError::DownloadDir {
            path: spec.download_dir.clone(),
            source: e,
        })?;

        Ok(Self {
            label: spec.label.clone(),
            driver,
            download_dir: spec.download_dir.clone(),
            policy: spec.policy.clone(),
            cancel,
            closed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn policy(&self) -> &InteractionPolicy {
        &self.policy
    }

    pub fn wait_budget(&self) -> Duration {
        self.policy.wait
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn kill_switch(&self) -> Option<KillSwitch> {
        self.driver.kill_switch()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fails with [`SessionError::Cancelled`] once the run was cancelled.
    pub fn checkpoint(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps unless cancelled first.
    pub fn pause(&self, duration: Duration) -> Result<(), SessionError> {
        if duration.is_zero() {
            return self.checkpoint();
        }
        if self.cancel.sleep(duration) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    /// Navigates to `url` and waits for `landing` to become ready.
    pub fn open(
        &mut self,
        url: &str,
        landing: &Locator,
        budget: Duration,
    ) -> Result<(), SessionError> {
        self.checkpoint()?;
        debug!(session = %self.label, url, "Navigating");

        if let Err(e) = self.driver.goto(url) {
            if e.is_fatal() {
                return Err(SessionError::BrowserFatal(e.to_string()));
            }
            warn!(session = %self.label, url, error = %e, "Navigation reported an error");
            return Err(SessionError::NavigationTimeout {
                url: url.to_string(),
                waited: Duration::ZERO,
            });
        }

        match self.find_when_ready(landing, Some(budget)) {
            Err(SessionError::ElementTimeout { waited, .. }) => {
                Err(SessionError::NavigationTimeout {
                    url: url.to_string(),
                    waited,
                })
            }
            other => other,
        }
    }

    /// Blocks until `locator` is displayed and enabled.
    pub fn find_when_ready(
        &mut self,
        locator: &Locator,
        budget: Option<Duration>,
    ) -> Result<(), SessionError> {
        let budget = budget.unwrap_or(self.policy.wait);
        let started = Instant::now();
        loop {
            self.checkpoint()?;
            match self.driver.probe(locator) {
                Ok(Some(state)) if state.is_ready() => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(SessionError::BrowserFatal(e.to_string())),
                Err(e) => debug!(session = %self.label, %locator, error = %e, "Probe failed"),
            }
            if started.elapsed() >= budget {
                return Err(SessionError::ElementTimeout {
                    locator: locator.to_string(),
                    waited: started.elapsed(),
                });
            }
            self.pause(self.policy.poll)?;
        }
    }

    /// Whether `locator` becomes visible within `window`. Never fails on timeout.
    pub fn appears_within(
        &mut self,
        locator: &Locator,
        window: Duration,
    ) -> Result<bool, SessionError> {
        let started = Instant::now();
        loop {
            self.checkpoint()?;
            match self.driver.probe(locator) {
                Ok(Some(state)) if state.displayed => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(SessionError::BrowserFatal(e.to_string())),
                Err(_) => {}
            }
            if started.elapsed() >= window {
                return Ok(false);
            }
            self.pause(self.policy.poll)?;
        }
    }

    /// Runs `action` against `locator` up to `attempts` times.
    ///
    /// The locator is resolved again before every attempt, so a stale or
    /// briefly hidden element does not fail the step. Returns the last
    /// observed error once attempts are exhausted.
    pub fn retrying<T, F>(
        &mut self,
        locator: &Locator,
        attempts: u32,
        pause: Duration,
        mut action: F,
    ) -> Result<T, SessionError>
    where
        F: FnMut(&mut dyn Driver, &Locator) -> Result<T, DriverError>,
    {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.checkpoint()?;

            match self.find_when_ready(locator, None) {
                Ok(()) => match action(self.driver.as_mut(), locator) {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_fatal() => {
                        return Err(SessionError::BrowserFatal(e.to_string()));
                    }
                    Err(e) => {
                        last_error = Some(SessionError::Action {
                            locator: locator.to_string(),
                            message: e.to_string(),
                        });
                    }
                },
                Err(e) if e.is_transient() => last_error = Some(e),
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                debug!(session = %self.label, %locator, attempt, "Retrying element action");
                self.pause(pause)?;
            }
        }

        Err(last_error.unwrap_or_else(|| SessionError::ElementTimeout {
            locator: locator.to_string(),
            waited: self.policy.wait,
        }))
    }

    fn retrying_default<T, F>(&mut self, locator: &Locator, action: F) -> Result<T, SessionError>
    where
        F: FnMut(&mut dyn Driver, &Locator) -> Result<T, DriverError>,
    {
        let (attempts, pause) = (self.policy.attempts, self.policy.retry_pause);
        self.retrying(locator, attempts, pause, action)
    }

    /// Replaces the contents of an input.
    pub fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), SessionError> {
        self.retrying_default(locator, |driver, loc| {
            driver.clear(loc)?;
            driver.send_keys(loc, value)
        })
    }

    /// Types into an element without clearing it first (special keys included).
    pub fn press(&mut self, locator: &Locator, keys: &str) -> Result<(), SessionError> {
        self.retrying_default(locator, |driver, loc| driver.send_keys(loc, keys))
    }

    pub fn select_by_value(&mut self, locator: &Locator, value: &str) -> Result<(), SessionError> {
        self.retrying_default(locator, |driver, loc| driver.select_by_value(loc, value))
    }

    pub fn select_by_visible_text(
        &mut self,
        locator: &Locator,
        text: &str,
    ) -> Result<(), SessionError> {
        self.retrying_default(locator, |driver, loc| driver.select_by_text(loc, text))
    }

    pub fn click(&mut self, locator: &Locator) -> Result<(), SessionError> {
        self.retrying_default(locator, |driver, loc| driver.click(loc))
    }

    pub fn options(&mut self, locator: &Locator) -> Result<Vec<SelectOption>, SessionError> {
        self.retrying_default(locator, |driver, loc| driver.options(loc))
    }

    pub fn text(&mut self, locator: &Locator) -> Result<String, SessionError> {
        self.retrying_default(locator, |driver, loc| driver.text(loc))
    }

    /// Waits until a dependent `<select>` has been repopulated with at least
    /// `min_count` options.
    pub fn wait_for_options(
        &mut self,
        locator: &Locator,
        min_count: usize,
        budget: Duration,
    ) -> Result<Vec<SelectOption>, SessionError> {
        let started = Instant::now();
        self.find_when_ready(locator, Some(budget))?;
        loop {
            self.checkpoint()?;
            match self.driver.options(locator) {
                Ok(options) if options.len() >= min_count => return Ok(options),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(SessionError::BrowserFatal(e.to_string())),
                Err(e) => debug!(session = %self.label, %locator, error = %e, "Option read failed"),
            }
            if started.elapsed() >= budget {
                return Err(SessionError::ElementTimeout {
                    locator: locator.to_string(),
                    waited: started.elapsed(),
                });
            }
            self.pause(self.policy.poll)?;
        }
    }

    pub fn page_source(&mut self) -> Result<String, SessionError> {
        self.checkpoint()?;
        self.driver.page_source().map_err(|e| {
            if e.is_fatal() {
                SessionError::BrowserFatal(e.to_string())
            } else {
                SessionError::Action {
                    locator: "<page>".to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    fn read_download_dir(&self) -> Result<Vec<(PathBuf, String)>, SessionError> {
        let entries = std::fs::read_dir(&self.download_dir).map_err(|e| {
            SessionError::DownloadDir {
                path: self.download_dir.clone(),
                source: e,
            }
        })?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let name = name.to_string();
                files.push((path, name));
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    fn is_partial(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.policy
            .partial_suffixes
            .iter()
            .any(|suffix| lower.ends_with(suffix.as_str()))
    }

    /// Records what is already in the download directory before a download
    /// is triggered.
    pub fn snapshot_downloads(&self) -> Result<DownloadSnapshot, SessionError> {
        let names = self
            .read_download_dir()?
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        Ok(DownloadSnapshot { names })
    }

    /// Removes every file left in the download directory.
    pub fn clear_downloads(&self) -> Result<(), SessionError> {
        for (path, _) in self.read_download_dir()? {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %redact_path(&path), error = %e, "Could not remove stale download");
            }
        }
        Ok(())
    }

    /// Blocks until a file that was not in `before` appears, is not a partial
    /// download and keeps the same non-zero size for one sampling interval.
    pub fn settle_download(
        &self,
        before: &DownloadSnapshot,
        budget: Duration,
    ) -> Result<PathBuf, SessionError> {
        let started = Instant::now();
        let mut pending: Option<(PathBuf, u64)> = None;

        loop {
            self.checkpoint()?;

            let candidate = self
                .read_download_dir()?
                .into_iter()
                .filter(|(_, name)| !before.contains(name) && !self.is_partial(name))
                .filter_map(|(path, _)| {
                    let size = std::fs::metadata(&path).ok()?.len();
                    (size > 0).then_some((path, size))
                })
                .last();

            if let Some((path, size)) = candidate {
                if pending.as_ref() == Some(&(path.clone(), size)) {
                    debug!(
                        session = %self.label,
                        file = %redact_path(&path),
                        size,
                        "Download settled"
                    );
                    return Ok(path);
                }
                pending = Some((path, size));
            } else {
                pending = None;
            }

            if started.elapsed() >= budget {
                return Err(SessionError::DownloadTimeout {
                    directory: self.download_dir.clone(),
                    waited: started.elapsed(),
                });
            }
            self.pause(self.policy.settle_sample)?;
        }
    }

    /// Releases the browser. Idempotent; `force` skips the graceful quit.
    pub fn close(&mut self, force: bool) {
        if self.closed {
            return;
        }
        self.closed = true;

        if force {
            if let Some(switch) = self.driver.kill_switch() {
                switch.fire();
            }
            return;
        }

        if let Err(e) = self.driver.quit() {
            warn!(session = %self.label, error = %e, "Graceful quit failed, killing browser");
            if let Some(switch) = self.driver.kill_switch() {
                switch.fire();
            }
        } else {
            debug!(session = %self.label, "Browser session closed");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.close(false);
    }
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("label", &self.label)
            .field("download_dir", &self.download_dir)
            .field("closed", &self.closed)
            .finish()
    }
}
