//! Built-in portal descriptions. A settings file only needs to carry what
//! differs from these.

use std::collections::BTreeMap;

use super::schema::{
    DownloadSettings, FieldInput, FieldSettings, FieldSource, Pauses, PortalSettings,
    PortalsSettings, ReportSettings, RunSettings, Settings, SideSettings, Timeouts,
    WebDriverSettings,
};
use crate::session::Locator;

pub const CONFIG_VERSION: &str = "1.0";

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            output_root: None,
            municipality_file: None,
            webdriver: WebDriverSettings::default(),
            download: DownloadSettings::default(),
            report: ReportSettings::default(),
            run: RunSettings::default(),
            portals: PortalsSettings::default(),
        }
    }
}

impl Default for PortalsSettings {
    fn default() -> Self {
        Self {
            federal_transfer: federal_transfer(),
            educational_fund: educational_fund(),
            health_fund_balance: health_fund_balance(),
            social_development: social_development(),
            resolution_payments: resolution_payments(),
        }
    }
}

fn css(s: &str) -> Locator {
    Locator::css(s)
}

fn xpath(s: &str) -> Locator {
    Locator::xpath(s)
}

fn map<V: Clone>(pairs: &[(&str, V)]) -> BTreeMap<String, V> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn base(url: &str) -> PortalSettings {
    PortalSettings {
        url: url.to_string(),
        locators: BTreeMap::new(),
        values: BTreeMap::new(),
        timeouts: Timeouts::default(),
        pauses: Pauses::default(),
        attempts: 3,
        step_attempts: 3,
        download_attempts: 3,
        empty_markers: vec![],
        relaxed_tls: false,
        fresh_session_per_task: false,
        reset_after_task: false,
        sides: vec![],
    }
}

fn field(locator: Locator, source: FieldSource, input: FieldInput) -> FieldSettings {
    FieldSettings {
        locator,
        source,
        input,
        optional: false,
        await_options: false,
    }
}

fn federal_transfer() -> PortalSettings {
    let continuar = xpath("//input[@value='Continuar'] | //button[contains(., 'Continuar')]");
    let mut portal = base("https://www42.bb.com.br/portalbb/daf/beneficiario,802,4647,4652,0,1.bbx");
    portal.locators = map(&[
        ("landing", Locator::id("formulario:txtBenef")),
        ("name_input", Locator::id("formulario:txtBenef")),
        ("continue_name", continuar.clone()),
        ("beneficiary_select", Locator::id("formulario:comboBeneficiario")),
        ("start_date", Locator::id("formulario:dataInicialInputDate")),
        ("end_date", Locator::id("formulario:dataFinalInputDate")),
        ("continue_query", continuar),
        ("results", css("table")),
    ]);
    portal.values = map(&[("state_tag", "MG".to_string())]);
    portal.empty_markers = vec![
        "NAO FORAM ENCONTRADOS".to_string(),
        "NENHUM REGISTRO ENCONTRADO".to_string(),
    ];
    portal.timeouts.results_secs = 15;
    portal
}

fn educational_fund() -> PortalSettings {
    let mut portal = base(
        "https://www.fnde.gov.br/pls/simad/internet_fnde.liberacoes_01_pc?p_ano={year}&p_uf=MG",
    );
    portal.locators = map(&[
        ("landing", Locator::name("p_ano")),
        ("year_select", Locator::name("p_ano")),
        ("municipality_select", Locator::name("p_municipio")),
        ("entity_select", Locator::name("p_tp_entidade")),
        ("submit", xpath("//input[@type='submit' or @value='Pesquisar']")),
        ("results", css("table")),
    ]);
    portal.values = map(&[("entity_code", "02".to_string())]);
    portal.empty_markers = vec![
        "NENHUM REGISTRO".to_string(),
        "NAO HA LIBERACOES".to_string(),
    ];
    portal.timeouts.results_secs = 10;
    portal
}

fn health_fund_balance() -> PortalSettings {
    let mut portal = base("https://consultafns.saude.gov.br/#/saldo-bancario");
    portal.locators = map(&[
        ("landing", Locator::id("estado")),
        ("state_select", Locator::id("estado")),
        ("municipality_select", Locator::id("municipio")),
        ("sphere_select", Locator::id("esfera")),
        ("submit", xpath("//button[contains(., 'Consultar')]")),
        (
            "download",
            xpath("//button[contains(., 'Download') or contains(., 'Exportar')]"),
        ),
    ]);
    portal.values = map(&[
        ("state", "MINAS GERAIS".to_string()),
        ("sphere", "MUNICIPAL".to_string()),
    ]);
    portal.timeouts.results_secs = 15;
    portal.timeouts.slow_mode_secs = 120;
    portal.pauses.optional_probe_ms = 3000;
    portal.pauses.dataset_finalize_ms = 30_000;
    portal.download_attempts = 3;
    portal
}

fn social_development() -> PortalSettings {
    let year = field(Locator::name("ano"), FieldSource::Year, FieldInput::SelectValue);
    let state = field(
        Locator::name("uf"),
        FieldSource::Fixed("MG".to_string()),
        FieldInput::SelectValue,
    );
    let month = field(Locator::name("mes"), FieldSource::Month, FieldInput::SelectValue);
    let sphere = FieldSettings {
        optional: true,
        ..field(
            Locator::name("esfera"),
            FieldSource::Fixed("MUNICIPAL".to_string()),
            FieldInput::SelectText,
        )
    };
    let municipality = FieldSettings {
        await_options: true,
        ..field(
            Locator::name("municipio"),
            FieldSource::Municipality,
            FieldInput::SelectMatch,
        )
    };
    let generate = xpath("//button[contains(., 'Gerar CSV')]");
    let search = Some(xpath("//button[contains(., 'Pesquisar')]"));
    let empty = Some(xpath("//*[contains(text(), 'Nenhum registro encontrado')]"));

    let mut portal = base("https://aplicacoes.mds.gov.br/suaswebcons/");
    portal.sides = vec![
        SideSettings {
            name: "parcela".to_string(),
            url: "https://aplicacoes.mds.gov.br/suaswebcons/parcelas-pagas".to_string(),
            landing: Locator::name("ano"),
            fields: vec![
                year.clone(),
                state.clone(),
                month,
                sphere,
                municipality.clone(),
            ],
            submit: search.clone(),
            download: generate.clone(),
            empty_probe: empty.clone(),
            post_submit_ms: None,
        },
        SideSettings {
            name: "saldo".to_string(),
            url: "https://aplicacoes.mds.gov.br/suaswebcons/saldos".to_string(),
            landing: Locator::name("ano"),
            fields: vec![year, state, municipality],
            submit: search,
            download: generate,
            empty_probe: empty,
            post_submit_ms: Some(60_000),
        },
    ];
    portal
}

fn resolution_payments() -> PortalSettings {
    let year = field(Locator::name("ano"), FieldSource::Year, FieldInput::SelectValue);
    let municipality = FieldSettings {
        await_options: true,
        ..field(
            Locator::name("municipio"),
            FieldSource::Municipality,
            FieldInput::SelectMatch,
        )
    };
    let submit = Some(xpath("//input[@type='submit']"));
    let empty = Some(xpath("//*[contains(text(), 'Nenhum resultado')]"));

    let mut portal = base("http://www.saude.mg.gov.br/resolucoes");
    portal.relaxed_tls = true;
    portal.reset_after_task = true;
    portal.sides = vec![
        SideSettings {
            name: "pagamentos".to_string(),
            url: "http://www.saude.mg.gov.br/resolucoes/pagamentos".to_string(),
            landing: Locator::name("ano"),
            fields: vec![year.clone(), municipality.clone()],
            submit: submit.clone(),
            download: xpath("//a[contains(@href, '.csv') or contains(., 'Exportar')]"),
            empty_probe: empty.clone(),
            post_submit_ms: None,
        },
        SideSettings {
            name: "deliberacoes".to_string(),
            url: "http://www.saude.mg.gov.br/resolucoes/deliberacoes".to_string(),
            landing: Locator::name("ano"),
            fields: vec![year, municipality],
            submit,
            download: xpath("//a[contains(@href, '.pdf')]"),
            empty_probe: empty,
            post_submit_ms: None,
        },
    ];
    portal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Portal;

    #[test]
    fn test_every_portal_has_a_url() {
        let settings = Settings::default();
        for portal in Portal::ALL {
            assert!(!settings.portals.get(portal).url.is_empty(), "{}", portal);
        }
    }

    #[test]
    fn test_dual_portals_have_two_sides() {
        let portals = PortalsSettings::default();
        let names: Vec<_> = portals
            .social_development
            .sides
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, ["parcela", "saldo"]);
        assert_eq!(portals.resolution_payments.sides.len(), 2);
        assert!(portals.resolution_payments.relaxed_tls);
    }

    #[test]
    fn test_defaults_round_trip_through_json() {
        let settings = Settings::default();
        let json = serde_json::to_value(&settings).unwrap();
        let back: Settings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }
}
