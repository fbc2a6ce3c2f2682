//! Banco do Brasil demonstrative of federal transfers.
//!
//! name → continue → state-tagged beneficiary → date range → continue →
//! results table → formatted workbook.

use chrono::Local;
use tracing::info_span;

use super::matching::match_tagged;
use super::steps::{self, await_results, step, AttemptPolicy, Outcome};
use super::{AdapterContext, PortalAdapter, SessionNeed, MAIN_SIDE};
use crate::config::{DownloadSettings, PortalSettings, Timeouts};
use crate::error::{AdapterError, ConfigError, SessionError};
use crate::job::{Period, Portal, Started, Task, TaskResult};
use crate::sanitize::file_stem;
use crate::session::{BrowserSession, InteractionPolicy, Locator, KEY_ESCAPE};
use crate::sink::layout::{federal_transfer_workbook, transfer_rows};
use crate::sink::table::largest_table;
use crate::sink::ResultSink;

#[derive(Debug, Clone)]
struct Locators {
    landing: Locator,
    name_input: Locator,
    continue_name: Locator,
    beneficiary_select: Locator,
    start_date: Locator,
    end_date: Locator,
    continue_query: Locator,
    results: Locator,
}

#[derive(Debug, Clone)]
pub struct FederalTransferAdapter {
    url: String,
    locators: Locators,
    state_tag: String,
    empty_markers: Vec<String>,
    timeouts: Timeouts,
    attempts: AttemptPolicy,
    policy: InteractionPolicy,
    relaxed_tls: bool,
}

impl FederalTransferAdapter {
    pub fn new(
        settings: &PortalSettings,
        download: &DownloadSettings,
    ) -> Result<Self, ConfigError> {
        let locators = Locators {
            landing: settings.locator("landing")?.clone(),
            name_input: settings.locator("name_input")?.clone(),
            continue_name: settings.locator("continue_name")?.clone(),
            beneficiary_select: settings.locator("beneficiary_select")?.clone(),
            start_date: settings.locator("start_date")?.clone(),
            end_date: settings.locator("end_date")?.clone(),
            continue_query: settings.locator("continue_query")?.clone(),
            results: settings.locator("results")?.clone(),
        };
        Ok(Self {
            url: settings.url.clone(),
            locators,
            state_tag: settings.value("state_tag")?.to_string(),
            empty_markers: settings.empty_markers.clone(),
            timeouts: settings.timeouts.clone(),
            attempts: AttemptPolicy::for_portal(settings),
            policy: settings.interaction_policy(download),
            relaxed_tls: settings.relaxed_tls,
        })
    }

    fn run_once(
        &self,
        session: &mut BrowserSession,
        task: &Task,
        sink: &ResultSink,
    ) -> Result<Outcome, AdapterError> {
        let Period::DateRange { start, end } = task.period else {
            return Err(ConfigError::Validation {
                message: format!("{} needs a date range, got '{}'", task.portal, task.period),
            }
            .into());
        };
        let l = &self.locators;

        step("landing", || {
            Ok(session.open(&self.url, &l.landing, self.timeouts.landing())?)
        })?;

        step("beneficiary", || {
            session.fill(&l.name_input, &task.municipality)?;
            session.click(&l.continue_name)?;
            let options =
                session.wait_for_options(&l.beneficiary_select, 2, self.timeouts.dependent())?;
            let option = match_tagged(&options, &task.municipality, &self.state_tag)
                .ok_or_else(|| AdapterError::MunicipalityNotFound(task.municipality.clone()))?;
            Ok(session.select_by_value(&l.beneficiary_select, &option.value)?)
        })?;

        step("period", || {
            session.find_when_ready(&l.start_date, Some(self.timeouts.field()))?;
            session.fill(&l.start_date, &start.format("%d/%m/%Y").to_string())?;
            session.fill(&l.end_date, &end.format("%d/%m/%Y").to_string())?;
            // The end-date picker stays open and covers the continue button.
            session.press(&l.end_date, KEY_ESCAPE)?;
            session.checkpoint()?;
            Ok(session.click(&l.continue_query)?)
        })?;

        let html = step("results", || {
            await_results(
                session,
                &l.results,
                &self.empty_markers,
                self.timeouts.results(),
            )
        })?;
        let Some(html) = html else {
            return Ok(Outcome::NoData(vec![]));
        };

        step("materialize", || {
            session.checkpoint()?;
            let table = largest_table(&html)?.ok_or_else(|| SessionError::ElementTimeout {
                locator: l.results.to_string(),
                waited: self.timeouts.results(),
            })?;
            let rows = transfer_rows(&table);
            if rows.is_empty() {
                return Ok(Outcome::NoData(vec![]));
            }
            let book = federal_transfer_workbook(&task.municipality, &task.period, &rows);
            let file_name = format!(
                "{}_{}.xlsx",
                file_stem(&task.municipality),
                Local::now().format("%H%M%S")
            );
            let path = sink.write_workbook(&book, Portal::FederalTransfer, &file_name)?;
            Ok(Outcome::Saved(vec![path]))
        })
    }
}

impl PortalAdapter for FederalTransferAdapter {
    fn portal(&self) -> Portal {
        Portal::FederalTransfer
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
