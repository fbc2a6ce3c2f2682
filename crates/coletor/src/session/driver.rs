//! The seam between a [`BrowserSession`](super::BrowserSession) and the
//! concrete browser automation backend.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::locator::Locator;

/// WebDriver key code for Escape, used to dismiss date pickers.
pub const KEY_ESCAPE: &str = "\u{E00C}";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("element not interactable: {0}")]
    NotInteractable(String),

    /// The browser (or the connection to it) is gone; nothing on this
    /// session will work again.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

/// Visibility of an element at the moment it was probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementState {
    pub displayed: bool,
    pub enabled: bool,
}

impl ElementState {
    pub const READY: ElementState = ElementState {
        displayed: true,
        enabled: true,
    };

    pub fn is_ready(&self) -> bool {
        self.displayed && self.enabled
    }
}

/// One `<option>` of a `<select>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
    /// The `title` attribute; some portals tag options with the state there.
    #[serde(default)]
    pub title: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
            title: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Forcefully terminates a browser from any thread.
///
/// Produced by the backend before the session is handed to a worker, so the
/// orchestrator can kill a browser whose worker is blocked inside a call.
#[derive(Clone)]
pub struct KillSwitch {
    label: String,
    kill: Arc<dyn Fn() + Send + Sync>,
}

impl KillSwitch {
    pub fn new(label: impl Into<String>, kill: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            kill: Arc::new(kill),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fire(&self) {
        (self.kill)();
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillSwitch")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Locator-based browser primitives.
///
/// Implementations are blocking; every call resolves the locator afresh, so
/// callers never hold element references that can go stale.
pub trait Driver: Send {
    fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// `Ok(None)` when nothing matches the locator right now.
    fn probe(&mut self, locator: &Locator) -> Result<Option<ElementState>, DriverError>;

    fn click(&mut self, locator: &Locator) -> Result<(), DriverError>;

    fn clear(&mut self, locator: &Locator) -> Result<(), DriverError>;

    fn send_keys(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError>;

    fn select_by_value(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError>;

    fn select_by_text(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError>;

    fn options(&mut self, locator: &Locator) -> Result<Vec<SelectOption>, DriverError>;

    fn text(&mut self, locator: &Locator) -> Result<String, DriverError>;

    fn page_source(&mut self) -> Result<String, DriverError>;

    /// Graceful shutdown of the browser.
    fn quit(&mut self) -> Result<(), DriverError>;

    fn kill_switch(&self) -> Option<KillSwitch> {
        None
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Driver")
    }
}
