use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::schema::{PortalSettings, Settings};
use crate::error::ConfigError;
use crate::job::Portal;

use super::defaults::CONFIG_VERSION;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Loads a settings file and merges it over the built-in defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!(path = %path.display(), "Loading settings");
    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let user: Value = serde_json::from_str(content)?;

    validate_schema(&user)?;

    let mut merged = serde_json::to_value(Settings::default())?;
    merge(&mut merged, user);

    let settings: Settings = serde_json::from_value(merged)?;

    validate_settings(&settings)?;

    Ok(settings)
}

/// Deep-merges `overlay` into `base`. Objects merge key by key; any other
/// value (arrays included) replaces what was there.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn validate_schema(json_value: &Value) -> Result<(), ConfigError> {
    let schema: Value = serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
        message: format!("Invalid embedded schema JSON: {}", e),
    })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", settings.version),
        });
    }

    if settings.download.rename_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "download.rename_attempts must be at least 1".to_string(),
        });
    }

    if let Some(url) = &settings.webdriver.remote_url {
        if url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "webdriver.remote_url is empty".to_string(),
            });
        }
    }

    for portal in Portal::ALL {
        validate_portal(portal, settings.portals.get(portal))?;
    }

    Ok(())
}

fn validate_portal(portal: Portal, settings: &PortalSettings) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::Validation {
        message: format!("portals.{}: {}", portal.tag(), message),
    };

    if settings.attempts == 0 || settings.step_attempts == 0 || settings.download_attempts == 0 {
        return Err(invalid("attempt counts must be at least 1".to_string()));
    }

    if portal.is_dual() {
        if settings.sides.is_empty() {
            return Err(invalid("at least one side is required".to_string()));
        }
        let mut names = HashSet::new();
        for side in &settings.sides {
            if side.name.trim().is_empty() || side.url.trim().is_empty() {
                return Err(invalid("every side needs a name and a url".to_string()));
            }
            if !names.insert(side.name.as_str()) {
                return Err(invalid(format!("duplicate side '{}'", side.name)));
            }
        }
    } else if settings.url.trim().is_empty() {
        return Err(invalid("url is empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_file_yields_defaults() {
        let settings = load_settings_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_override_keeps_sibling_defaults() {
        let settings = load_settings_from_str(
            r#"{
                "version": "1.0",
                "portals": {
                    "educational_fund": {
                        "timeouts": { "results_secs": 25 },
                        "locators": { "submit": "css:#btnPesquisar" }
                    }
                }
            }"#,
        )
        .unwrap();

        let fund = &settings.portals.educational_fund;
        assert_eq!(fund.timeouts.results_secs, 25);
        assert_eq!(fund.timeouts.landing_secs, 10);
        assert_eq!(
            fund.locator("submit").unwrap().to_string(),
            "css:#btnPesquisar"
        );
        assert!(fund.locator("municipality_select").is_ok());
        assert_eq!(
            settings.portals.federal_transfer,
            Settings::default().portals.federal_transfer
        );
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let result = load_settings_from_str(r#"{"version": "2.0"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        let result = load_settings_from_str(r#"{"version": "1.0", "workers": 3}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_malformed_locator_is_rejected() {
        let result = load_settings_from_str(
            r##"{
                "version": "1.0",
                "portals": { "health_fund_balance": { "locators": { "submit": "#consultar" } } }
            }"##,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let result = load_settings_from_str(
            r#"{"version": "1.0", "portals": {"federal_transfer": {"attempts": 0}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sides_array_replaces_defaults() {
        let settings = load_settings_from_str(
            r#"{
                "version": "1.0",
                "portals": {
                    "resolution_payments": {
                        "sides": [{
                            "name": "pagamentos",
                            "url": "http://localhost/pagamentos",
                            "landing": "name:ano",
                            "download": "css:a.csv"
                        }]
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.portals.resolution_payments.sides.len(), 1);
    }

    #[test]
    fn test_duplicate_side_names_are_rejected() {
        let side = r#"{"name": "saldo", "url": "http://x", "landing": "name:a", "download": "css:b"}"#;
        let json = format!(
            r#"{{"version": "1.0", "portals": {{"social_development": {{"sides": [{}, {}]}}}}}}"#,
            side, side
        );
        assert!(load_settings_from_str(&json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": "1.0", "report": {{"include_success_list": false}}}}"#
        )
        .unwrap();
        let settings = load_settings(file.path()).unwrap();
        assert!(!settings.report.include_success_list);
    }

    #[test]
    fn test_merge_replaces_scalars_and_arrays() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": [1, 2]}, "d": true});
        merge(&mut base, serde_json::json!({"a": {"c": [3]}, "e": "x"}));
        assert_eq!(
            base,
            serde_json::json!({"a": {"b": 1, "c": [3]}, "d": true, "e": "x"})
        );
    }
}
