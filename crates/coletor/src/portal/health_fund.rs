//! FNS bank balances. Current balances only, so tasks carry no period.
//!
//! Some municipalities get an extra "sphere" dropdown; the portal then builds
//! the dataset on demand and the download button takes much longer to show.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, info_span};

use super::steps::{
    self, download_retrying, select_municipality, step, AttemptPolicy, Outcome,
};
use super::{AdapterContext, PortalAdapter, SessionNeed, MAIN_SIDE};
use crate::config::{DownloadSettings, Pauses, PortalSettings, Timeouts};
use crate::error::{AdapterError, ConfigError};
use crate::job::{Portal, Started, Task, TaskResult};
use crate::sanitize::file_stem;
use crate::session::{BrowserSession, InteractionPolicy, Locator};
use crate::sink::table::contains_marker;
use crate::sink::ResultSink;

#[derive(Debug, Clone)]
struct Locators {
    landing: Locator,
    state_select: Locator,
    municipality_select: Locator,
    sphere_select: Locator,
    submit: Locator,
    download: Locator,
}

#[derive(Debug, Clone)]
pub struct HealthFundAdapter {
    url: String,
    locators: Locators,
    state: String,
    sphere: String,
    empty_markers: Vec<String>,
    timeouts: Timeouts,
    pauses: Pauses,
    download_attempts: u32,
    settle_timeout: Duration,
    attempts: AttemptPolicy,
    policy: InteractionPolicy,
    relaxed_tls: bool,
}

impl HealthFundAdapter {
    pub fn new(
        settings: &PortalSettings,
        download: &DownloadSettings,
    ) -> Result<Self, ConfigError> {
        let locators = Locators {
            landing: settings.locator("landing")?.clone(),
            state_select: settings.locator("state_select")?.clone(),
            municipality_select: settings.locator("municipality_select")?.clone(),
            sphere_select: settings.locator("sphere_select")?.clone(),
            submit: settings.locator("submit")?.clone(),
            download: settings.locator("download")?.clone(),
        };
        Ok(Self {
            url: settings.url.clone(),
            locators,
            state: settings.value("state")?.to_string(),
            sphere: settings.value("sphere")?.to_string(),
            empty_markers: settings.empty_markers.clone(),
            timeouts: settings.timeouts.clone(),
            pauses: settings.pauses.clone(),
            download_attempts: settings.download_attempts.max(1),
            settle_timeout: download.settle_timeout(),
            attempts: AttemptPolicy::for_portal(settings),
            policy: settings.interaction_policy(download),
            relaxed_tls: settings.relaxed_tls,
        })
    }

    fn download(&self, session: &mut BrowserSession, slow: bool) -> Result<PathBuf, AdapterError> {
        let ready = if slow {
            self.timeouts.slow_mode()
        } else {
            self.timeouts.download()
        };
        download_retrying(
            session,
            &self.locators.download,
            ready,
            self.settle_timeout,
            self.download_attempts,
        )
    }

    fn run_once(
        &self,
        session: &mut BrowserSession,
        task: &Task,
        sink: &ResultSink,
    ) -> Result<Outcome, AdapterError> {
        let l = &self.locators;

        step("landing", || {
            Ok(session.open(&self.url, &l.landing, self.timeouts.landing())?)
        })?;

        let slow = step("form", || {
            session.select_by_visible_text(&l.state_select, &self.state)?;
            select_municipality(
                session,
                &l.municipality_select,
                &task.municipality,
                Some(self.timeouts.dependent()),
            )?;

            let sphere = session.appears_within(&l.sphere_select, self.pauses.optional_probe())?;
            if sphere {
                debug!("Sphere field shown, switching to slow mode");
                session.select_by_visible_text(&l.sphere_select, &self.sphere)?;
            }
            session.click(&l.submit)?;
            Ok(sphere)
        })?;

        if !self.empty_markers.is_empty() {
            session.pause(self.pauses.post_submit())?;
            if contains_marker(&session.page_source()?, &self.empty_markers) {
                return Ok(Outcome::NoData(vec![]));
            }
        }

        let downloaded = step("download", || {
            if slow {
                session.find_when_ready(&l.download, Some(self.timeouts.slow_mode()))?;
                info!(
                    wait_secs = self.pauses.dataset_finalize().as_secs(),
                    "Letting the dataset finalize"
                );
                session.pause(self.pauses.dataset_finalize())?;
            }
            self.download(session, slow)
        })?;

        let stored = sink.store_download(
            &downloaded,
            Portal::HealthFundBalance,
            None,
            &file_stem(&task.municipality),
        )?;
        Ok(Outcome::Saved(vec![stored]))
    }
}

impl PortalAdapter for HealthFundAdapter {
    fn portal(&self) -> Portal {
        Portal::HealthFundBalance
    }

    fn sessions(&self) -> Vec<SessionNeed> {
        vec![SessionNeed {
            side: MAIN_SIDE.to_string(),
            relaxed_tls: self.relaxed_tls,
            policy: self.policy.clone(),
        }]
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

        let result = match ctx.sessions.slot(0) {
            Ok(slot) => steps::attempt_loop(slot, &self.attempts, |session| {
                self.run_once(session, task, ctx.sink)
            }),
            Err(e) => Err(e.into()),
        };
        steps::finish(task, started, result)
    }
}
