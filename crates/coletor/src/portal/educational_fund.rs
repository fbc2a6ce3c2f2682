//! FNDE transfer releases: one table per municipality and year.

use tracing::{debug, info_span};

use super::steps::{
    self, await_results, expand_url, select_municipality, step, AttemptPolicy, Outcome,
};
use super::{AdapterContext, PortalAdapter, SessionNeed, MAIN_SIDE};
use crate::config::{DownloadSettings, Pauses, PortalSettings, Timeouts};
use crate::error::{AdapterError, ConfigError};
use crate::job::{Period, Portal, Started, Task, TaskResult};
use crate::sanitize::file_stem;
use crate::session::{BrowserSession, InteractionPolicy, Locator};
use crate::sink::layout::educational_fund_workbook;
use crate::sink::table::largest_table;
use crate::sink::ResultSink;

#[derive(Debug, Clone)]
struct Locators {
    landing: Locator,
    year_select: Locator,
    municipality_select: Locator,
    entity_select: Locator,
    submit: Locator,
    results: Locator,
}

#[derive(Debug, Clone)]
pub struct EducationalFundAdapter {
    url: String,
    locators: Locators,
    entity_code: String,
    empty_markers: Vec<String>,
    timeouts: Timeouts,
    pauses: Pauses,
    attempts: AttemptPolicy,
    policy: InteractionPolicy,
    relaxed_tls: bool,
}

impl EducationalFundAdapter {
    pub fn new(
        settings: &PortalSettings,
        download: &DownloadSettings,
    ) -> Result<Self, ConfigError> {
        let locators = Locators {
            landing: settings.locator("landing")?.clone(),
            year_select: settings.locator("year_select")?.clone(),
            municipality_select: settings.locator("municipality_select")?.clone(),
            entity_select: settings.locator("entity_select")?.clone(),
            submit: settings.locator("submit")?.clone(),
            results: settings.locator("results")?.clone(),
        };
        Ok(Self {
            url: settings.url.clone(),
            locators,
            entity_code: settings.value("entity_code")?.to_string(),
            empty_markers: settings.empty_markers.clone(),
            timeouts: settings.timeouts.clone(),
            pauses: settings.pauses.clone(),
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
        let Period::Year { year } = task.period else {
            return Err(ConfigError::Validation {
                message: format!("{} needs a year, got '{}'", task.portal, task.period),
            }
            .into());
        };
        let l = &self.locators;

        step("landing", || {
            let url = expand_url(&self.url, task);
            Ok(session.open(&url, &l.landing, self.timeouts.landing())?)
        })?;

        step("form", || {
            session.select_by_value(&l.year_select, &year.to_string())?;
            select_municipality(
                session,
                &l.municipality_select,
                &task.municipality,
                Some(self.timeouts.dependent()),
            )?;
            session.select_by_value(&l.entity_select, &self.entity_code)?;
            session.click(&l.submit)?;
            Ok(session.pause(self.pauses.post_submit())?)
        })?;

        let html = step("results", || {
            await_results(session, &l.results, &self.empty_markers, self.timeouts.results())
        })?;
        let Some(html) = html else {
            return Ok(Outcome::NoData(vec![]));
        };

        step("materialize", || {
            let table = match largest_table(&html)? {
                Some(table) if table.has_body() => table,
                _ => {
                    debug!("Results page carries no table rows");
                    return Ok(Outcome::NoData(vec![]));
                }
            };
            let book = educational_fund_workbook(&task.municipality, year, &table);
            let file_name = format!("{}_{}.xlsx", year, file_stem(&task.municipality));
            let path = sink.write_workbook(&book, Portal::EducationalFund, &file_name)?;
            Ok(Outcome::Saved(vec![path]))
        })
    }
}

impl PortalAdapter for EducationalFundAdapter {
    fn portal(&self) -> Portal {
        Portal::EducationalFund
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::Settings;
    use crate::job::TaskStatus;
    use crate::session::fake::{FakeElement, FakeFactory, FakeHandle};
    use crate::session::{KillRegistry, SelectOption, SessionSet, SessionSpec};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tempfile::TempDir;

    const RELEASES: &str = r#"<table>
        <tr><th>PROGRAMA</th><th>DATA</th><th>VALOR</th></tr>
        <tr><td>PNAE</td><td>03/02/2023</td><td>12.500,00</td></tr>
        <tr><td>PDDE</td><td>10/03/2023</td><td>3.000,00</td></tr>
    </table>"#;

    fn adapter() -> EducationalFundAdapter {
        let mut settings = Settings::default();
        let portal = &mut settings.portals.educational_fund;
        portal.pauses.retry_ms = 1;
        portal.timeouts.landing_secs = 1;
        portal.timeouts.dependent_secs = 1;
        portal.timeouts.results_secs = 1;
        EducationalFundAdapter::new(portal, &settings.download).unwrap()
    }

    fn script(
        adapter: &EducationalFundAdapter,
        page: &'static str,
    ) -> impl Fn(&FakeHandle, &SessionSpec) + Send + Sync + 'static {
        let l = adapter.locators.clone();
        move |handle, _| {
            handle.insert(
                l.year_select.clone(),
                FakeElement::select(vec![
                    SelectOption::new("2022", "2022"),
                    SelectOption::new("2023", "2023"),
                ]),
            );
            handle.insert(
                l.entity_select.clone(),
                FakeElement::select(vec![
                    SelectOption::new("01", "ESTADUAL"),
                    SelectOption::new("02", "MUNICIPAL"),
                ]),
            );
            handle.insert(l.submit.clone(), FakeElement::button());

            let municipality = l.municipality_select.clone();
            handle.on_select(l.year_select.clone(), move |state, _| {
                state.insert(
                    municipality.clone(),
                    FakeElement::select(vec![
                        SelectOption::new("", "--"),
                        SelectOption::new("310400", "ARAXA"),
                        SelectOption::new("317020", "UBERLANDIA"),
                    ]),
                );
            });
            let results = l.results.clone();
            handle.on_click(l.submit.clone(), move |state| {
                state.page_source = page.to_string();
                state.insert(results.clone(), FakeElement::text("liberacoes"));
            });
        }
    }

    fn run(
        adapter: &EducationalFundAdapter,
        factory: Arc<FakeFactory>,
        tmp: &TempDir,
    ) -> TaskResult {
        let specs = super::super::session_specs(adapter, &tmp.path().join("scratch"), 2)
            .into_iter()
            .map(|s| s.with_policy(InteractionPolicy::fast()))
            .collect();
        let mut sessions =
            SessionSet::new(specs, factory, &CancelToken::new(), &KillRegistry::new());
        let sink = ResultSink::new(
            tmp.path().join("out"),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        );
        let task = Task::new(
            3,
            Portal::EducationalFund,
            Period::Year { year: 2023 },
            "Araxá".to_string(),
        )
        .assigned_to(2);
        adapter.execute(
            &task,
            &mut AdapterContext {
                sessions: &mut sessions,
                sink: &sink,
            },
        )
    }

    #[test]
    fn test_releases_table_is_written_per_year() {
        let tmp = TempDir::new().unwrap();
        let adapter = adapter();
        let factory = Arc::new(FakeFactory::with_setup(script(&adapter, RELEASES)));

        let result = run(&adapter, Arc::clone(&factory), &tmp);
        assert_eq!(result.status, TaskStatus::Succeeded, "{:?}", result.error);
        assert!(result
            .output_path()
            .unwrap()
            .ends_with("fnde/2024-01-05/2023_ARAXA.xlsx"));

        let handle = &factory.handles_for("w2-main")[0];
        assert!(handle.visits()[0].contains("p_ano=2023"));
        let l = &adapter.locators;
        assert_eq!(handle.value_of(&l.municipality_select).as_deref(), Some("310400"));
        assert_eq!(handle.value_of(&l.entity_select).as_deref(), Some("02"));
    }

    #[test]
    fn test_header_only_table_is_no_data() {
        let tmp = TempDir::new().unwrap();
        let adapter = adapter();
        let factory = Arc::new(FakeFactory::with_setup(script(
            &adapter,
            "<table><tr><th>PROGRAMA</th><th>VALOR</th></tr></table>",
        )));

        let result = run(&adapter, factory, &tmp);
        assert_eq!(result.status, TaskStatus::NoData);
        assert!(!tmp.path().join("out/fnde/2024-01-05/2023_ARAXA.xlsx").exists());
    }

    #[test]
    fn test_wrong_period_kind_fails() {
        let tmp = TempDir::new().unwrap();
        let adapter = adapter();
        let specs = super::super::session_specs(&adapter, tmp.path(), 1);
        let mut sessions = SessionSet::new(
            specs,
            Arc::new(FakeFactory::default()),
            &CancelToken::new(),
            &KillRegistry::new(),
        );
        let sink = ResultSink::new(tmp.path(), NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        let task = Task::new(0, Portal::EducationalFund, Period::None, "ARAXA".into());

        let result = adapter.execute(
            &task,
            &mut AdapterContext {
                sessions: &mut sessions,
                sink: &sink,
            },
        );
        assert_eq!(result.status, TaskStatus::Failed);
    }
}
