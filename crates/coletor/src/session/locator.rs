use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How an element is found on a page.
///
/// Written in settings files as a prefixed string: `css:#form input`,
/// `xpath://button[contains(., 'Consultar')]`, `id:formulario:txtBenef`,
/// `name:p_municipio`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    Css(String),
    XPath(String),
    Id(String),
    Name(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Locator::Name(name.into())
    }

    /// The bare selector without its strategy prefix.
    pub fn selector(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::XPath(s) | Locator::Id(s) | Locator::Name(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
            Locator::Id(s) => write!(f, "id:{}", s),
            Locator::Name(s) => write!(f, "name:{}", s),
        }
    }
}

impl FromStr for Locator {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidLocator {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let (strategy, selector) = match raw.split_once(':') {
            Some((strategy, rest)) if matches!(strategy, "css" | "xpath" | "id" | "name") => {
                (strategy, rest.trim())
            }
            _ if raw.starts_with('/') || raw.starts_with("(/") => ("xpath", raw.trim()),
            _ => return Err(invalid("expected a css:, xpath:, id: or name: prefix")),
        };

        if selector.is_empty() {
            return Err(invalid("selector is empty"));
        }

        let locator = match strategy {
            "css" => Locator::Css(selector.to_string()),
            "xpath" => Locator::XPath(selector.to_string()),
            "id" => Locator::Id(selector.to_string()),
            _ => Locator::Name(selector.to_string()),
        };
        Ok(locator)
    }
}

impl TryFrom<String> for Locator {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}
