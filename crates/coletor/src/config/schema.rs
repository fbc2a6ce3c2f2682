use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::Portal;
use crate::session::{InteractionPolicy, Locator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    #[serde(default)]
    pub municipality_file: Option<PathBuf>,
    #[serde(default)]
    pub webdriver: WebDriverSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub run: RunSettings,
    pub portals: PortalsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebDriverSettings {
    /// chromedriver binary; looked up on `PATH` when absent.
    #[serde(default)]
    pub chromedriver: Option<PathBuf>,
    /// Connect to an already running WebDriver server instead of spawning one.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub browser_binary: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// Time granted to browsers after cancellation before they are killed.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_kill_grace() -> u64 {
    5
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            chromedriver: None,
            remote_url: None,
            browser_binary: None,
            headless: true,
            extra_args: vec![],
            startup_timeout_secs: default_startup_timeout(),
            kill_grace_secs: default_kill_grace(),
        }
    }
}

impl WebDriverSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_secs: u64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_partial_suffixes")]
    pub partial_suffixes: Vec<String>,
    #[serde(default = "default_rename_attempts")]
    pub rename_attempts: u32,
    #[serde(default = "default_rename_pause")]
    pub rename_pause_ms: u64,
}

fn default_settle_timeout() -> u64 {
    30
}

fn default_sample_interval() -> u64 {
    1000
}

fn default_partial_suffixes() -> Vec<String> {
    vec![
        ".crdownload".to_string(),
        ".tmp".to_string(),
        ".part".to_string(),
    ]
}

fn default_rename_attempts() -> u32 {
    5
}

fn default_rename_pause() -> u64 {
    500
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            settle_timeout_secs: default_settle_timeout(),
            sample_interval_ms: default_sample_interval(),
            partial_suffixes: default_partial_suffixes(),
            rename_attempts: default_rename_attempts(),
            rename_pause_ms: default_rename_pause(),
        }
    }
}

impl DownloadSettings {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn rename_pause(&self) -> Duration {
        Duration::from_millis(self.rename_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_true")]
    pub include_success_list: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            include_success_list: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Write each worker's shard to a text file while the run lasts.
    #[serde(default)]
    pub write_shard_manifests: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalsSettings {
    pub federal_transfer: PortalSettings,
    pub educational_fund: PortalSettings,
    pub health_fund_balance: PortalSettings,
    pub social_development: PortalSettings,
    pub resolution_payments: PortalSettings,
}

impl PortalsSettings {
    pub fn get(&self, portal: Portal) -> &PortalSettings {
        match portal {
            Portal::FederalTransfer => &self.federal_transfer,
            Portal::EducationalFund => &self.educational_fund,
            Portal::HealthFundBalance => &self.health_fund_balance,
            Portal::SocialDevelopment => &self.social_development,
            Portal::ResolutionPayments => &self.resolution_payments,
        }
    }
}

/// Everything an adapter needs to know about one portal's pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Landing URL. May contain `{year}` and `{month}` placeholders.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub locators: BTreeMap<String, Locator>,
    /// Fixed form values such as the state tag or the entity code.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub pauses: Pauses,
    /// Attempts per task before it is recorded as failed.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Attempts per element action.
    #[serde(default = "default_attempts")]
    pub step_attempts: u32,
    #[serde(default = "default_attempts")]
    pub download_attempts: u32,
    /// Page texts meaning "no records for this query".
    #[serde(default)]
    pub empty_markers: Vec<String>,
    #[serde(default)]
    pub relaxed_tls: bool,
    #[serde(default)]
    pub fresh_session_per_task: bool,
    /// Re-open the landing page on every session after each task.
    #[serde(default)]
    pub reset_after_task: bool,
    /// Form pages driven side by side, one session each.
    #[serde(default)]
    pub sides: Vec<SideSettings>,
}

fn default_attempts() -> u32 {
    3
}

impl PortalSettings {
    pub fn locator(&self, key: &str) -> Result<&Locator, ConfigError> {
        self.locators.get(key).ok_or_else(|| ConfigError::Validation {
            message: format!("missing locator '{}'", key),
        })
    }

    pub fn value(&self, key: &str) -> Result<&str, ConfigError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::Validation {
                message: format!("missing value '{}'", key),
            })
    }

    /// Session behaviour derived from this portal's timings.
    pub fn interaction_policy(&self, download: &DownloadSettings) -> InteractionPolicy {
        InteractionPolicy {
            wait: self.timeouts.field(),
            poll: Duration::from_millis(self.pauses.poll_ms),
            attempts: self.step_attempts.max(1),
            retry_pause: self.pauses.retry(),
            settle_sample: download.sample_interval(),
            partial_suffixes: download.partial_suffixes.clone(),
        }
    }
}

/// Wait budgets in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_landing")]
    pub landing_secs: u64,
    #[serde(default = "default_field")]
    pub field_secs: u64,
    #[serde(default = "default_dependent")]
    pub dependent_secs: u64,
    #[serde(default = "default_results")]
    pub results_secs: u64,
    #[serde(default = "default_download")]
    pub download_secs: u64,
    #[serde(default = "default_slow_mode")]
    pub slow_mode_secs: u64,
}

fn default_landing() -> u64 {
    10
}

fn default_field() -> u64 {
    8
}

fn default_dependent() -> u64 {
    5
}

fn default_results() -> u64 {
    15
}

fn default_download() -> u64 {
    30
}

fn default_slow_mode() -> u64 {
    120
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            landing_secs: default_landing(),
            field_secs: default_field(),
            dependent_secs: default_dependent(),
            results_secs: default_results(),
            download_secs: default_download(),
            slow_mode_secs: default_slow_mode(),
        }
    }
}

impl Timeouts {
    pub fn landing(&self) -> Duration {
        Duration::from_secs(self.landing_secs)
    }

    pub fn field(&self) -> Duration {
        Duration::from_secs(self.field_secs)
    }

    pub fn dependent(&self) -> Duration {
        Duration::from_secs(self.dependent_secs)
    }

    pub fn results(&self) -> Duration {
        Duration::from_secs(self.results_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn slow_mode(&self) -> Duration {
        Duration::from_secs(self.slow_mode_secs)
    }
}

/// Pauses in milliseconds. Each one orders two specific page events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pauses {
    #[serde(default = "default_retry_pause")]
    pub retry_ms: u64,
    #[serde(default = "default_poll")]
    pub poll_ms: u64,
    /// After submitting a form, before looking at the result.
    #[serde(default)]
    pub post_submit_ms: u64,
    /// Extra wait before downloading a dataset that is still being assembled.
    #[serde(default)]
    pub dataset_finalize_ms: u64,
    /// Window in which an optional field may appear.
    #[serde(default = "default_probe")]
    pub optional_probe_ms: u64,
    /// Window in which the "no records" marker may appear.
    #[serde(default = "default_probe")]
    pub empty_probe_ms: u64,
}

fn default_retry_pause() -> u64 {
    1000
}

fn default_poll() -> u64 {
    250
}

fn default_probe() -> u64 {
    2000
}

impl Default for Pauses {
    fn default() -> Self {
        Self {
            retry_ms: default_retry_pause(),
            poll_ms: default_poll(),
            post_submit_ms: 0,
            dataset_finalize_ms: 0,
            optional_probe_ms: default_probe(),
            empty_probe_ms: default_probe(),
        }
    }
}

impl Pauses {
    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn post_submit(&self) -> Duration {
        Duration::from_millis(self.post_submit_ms)
    }

    pub fn dataset_finalize(&self) -> Duration {
        Duration::from_millis(self.dataset_finalize_ms)
    }

    pub fn optional_probe(&self) -> Duration {
        Duration::from_millis(self.optional_probe_ms)
    }

    pub fn empty_probe(&self) -> Duration {
        Duration::from_millis(self.empty_probe_ms)
    }
}

/// One form page of a portal that is driven by its own session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideSettings {
    /// Output sub-folder, e.g. `parcela`.
    pub name: String,
    /// May contain `{year}` and `{month}` placeholders.
    pub url: String,
    pub landing: Locator,
    #[serde(default)]
    pub fields: Vec<FieldSettings>,
    #[serde(default)]
    pub submit: Option<Locator>,
    /// Element whose click starts the download.
    pub download: Locator,
    /// Marker shown when the query has no rows.
    #[serde(default)]
    pub empty_probe: Option<Locator>,
    /// Overrides the portal's post-submit pause for this side.
    #[serde(default)]
    pub post_submit_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSettings {
    pub locator: Locator,
    pub source: FieldSource,
    #[serde(default)]
    pub input: FieldInput,
    /// Only filled when the field shows up within the optional-probe window.
    #[serde(default)]
    pub optional: bool,
    /// Wait for the options to be repopulated by the previous field first.
    #[serde(default)]
    pub await_options: bool,
}

/// Where a field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Year,
    /// Two-digit month.
    Month,
    Municipality,
    Fixed(String),
}

/// How a value is entered into a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldInput {
    #[default]
    SelectValue,
    SelectText,
    /// Exact-then-contains match against the option texts.
    SelectMatch,
    Type,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_source_forms() {
        let year: FieldSource = serde_json::from_str("\"year\"").unwrap();
        assert_eq!(year, FieldSource::Year);
        let fixed: FieldSource = serde_json::from_str(r#"{"fixed": "MUNICIPAL"}"#).unwrap();
        assert_eq!(fixed, FieldSource::Fixed("MUNICIPAL".into()));
    }

    #[test]
    fn test_field_defaults() {
        let field: FieldSettings = serde_json::from_str(
            r#"{"locator": "name:ano", "source": "year"}"#,
        )
        .unwrap();
        assert_eq!(field.input, FieldInput::SelectValue);
        assert!(!field.optional);
        assert!(!field.await_options);
    }

    #[test]
    fn test_missing_locator_is_reported_by_key() {
        let portal = PortalSettings {
            url: "https://example.test".into(),
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
        };
        let err = portal.locator("results").unwrap_err();
        assert!(err.to_string().contains("results"));
    }

    #[test]
    fn test_interaction_policy_follows_timings() {
        let mut portal: PortalSettings =
            serde_json::from_str(r#"{"url": "https://example.test"}"#).unwrap();
        portal.timeouts.field_secs = 12;
        portal.step_attempts = 0;
        let policy = portal.interaction_policy(&DownloadSettings::default());
        assert_eq!(policy.wait, Duration::from_secs(12));
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.settle_sample, Duration::from_secs(1));
    }
}
