//! Scripted in-memory driver for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::driver::{Driver, DriverError, ElementState, KillSwitch, SelectOption};
use super::factory::{SessionFactory, SessionSpec};
use super::locator::Locator;
use super::BrowserSession;
use crate::cancel::CancelToken;
use crate::error::SessionError;

#[derive(Debug, Clone)]
pub(crate) struct FakeElement {
    pub displayed: bool,
    pub enabled: bool,
    pub value: String,
    pub text: String,
    pub options: Vec<SelectOption>,
}

impl FakeElement {
    pub fn button() -> Self {
        Self {
            displayed: true,
            enabled: true,
            value: String::new(),
            text: String::new(),
            options: vec![],
        }
    }

    pub fn input(value: &str) -> Self {
        Self {
            value: value.to_string(),
            ..Self::button()
        }
    }

    pub fn select(options: Vec<SelectOption>) -> Self {
        Self {
            options,
            ..Self::button()
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::button()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::button()
        }
    }
}

type Hook = Box<dyn FnMut(&mut FakeState) + Send>;
type ValueHook = Box<dyn FnMut(&mut FakeState, &str) + Send>;

#[derive(Default)]
pub(crate) struct FakeState {
    pub elements: HashMap<Locator, FakeElement>,
    pub page_source: String,
    visits: Vec<String>,
    actions: Vec<String>,
    lost: bool,
    quits: usize,
    kills: usize,
    on_goto: Option<ValueHook>,
    on_click: HashMap<Locator, Hook>,
    on_select: HashMap<Locator, ValueHook>,
}

impl FakeState {
    pub fn insert(&mut self, locator: Locator, element: FakeElement) {
        self.elements.insert(locator, element);
    }

    pub fn remove(&mut self, locator: &Locator) {
        self.elements.remove(locator);
    }
}

/// Test-side view of a [`FakeDriver`]'s state.
#[derive(Clone, Default)]
pub(crate) struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, locator: Locator, element: FakeElement) {
        self.lock().insert(locator, element);
    }

    pub fn set_page_source(&self, html: &str) {
        self.lock().page_source = html.to_string();
    }

    pub fn on_goto(&self, hook: impl FnMut(&mut FakeState, &str) + Send + 'static) {
        self.lock().on_goto = Some(Box::new(hook));
    }

    pub fn on_click(&self, locator: Locator, hook: impl FnMut(&mut FakeState) + Send + 'static) {
        self.lock().on_click.insert(locator, Box::new(hook));
    }

    pub fn on_select(
        &self,
        locator: Locator,
        hook: impl FnMut(&mut FakeState, &str) + Send + 'static,
    ) {
        self.lock().on_select.insert(locator, Box::new(hook));
    }

    pub fn lose_browser(&self) {
        self.lock().lost = true;
    }

    pub fn visits(&self) -> Vec<String> {
        self.lock().visits.clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    pub fn value_of(&self, locator: &Locator) -> Option<String> {
        self.lock().elements.get(locator).map(|e| e.value.clone())
    }

    pub fn quit_count(&self) -> usize {
        self.lock().quits
    }

    pub fn kill_count(&self) -> usize {
        self.lock().kills
    }
}

pub(crate) struct FakeDriver {
    handle: FakeHandle,
}

impl FakeDriver {
    pub fn new() -> (Self, FakeHandle) {
        let handle = FakeHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn live(&self) -> Result<MutexGuard<'_, FakeState>, DriverError> {
        let state = self.handle.lock();
        if state.lost {
            return Err(DriverError::SessionLost("fake browser gone".into()));
        }
        Ok(state)
    }

    fn element<'a>(
        state: &'a mut FakeState,
        locator: &Locator,
    ) -> Result<&'a mut FakeElement, DriverError> {
        match state.elements.get_mut(locator) {
            Some(element) if element.displayed && element.enabled => Ok(element),
            Some(_) => Err(DriverError::NotInteractable(locator.to_string())),
            None => Err(DriverError::NoSuchElement(locator.to_string())),
        }
    }

    fn select(&mut self, locator: &Locator, value: String) -> Result<(), DriverError> {
        let mut state = self.live()?;
        Self::element(&mut state, locator)?.value = value.clone();
        state.actions.push(format!("select {}={}", locator, value));
        if let Some(mut hook) = state.on_select.remove(locator) {
            hook(&mut *state, &value);
            state.on_select.entry(locator.clone()).or_insert(hook);
        }
        Ok(())
    }
}

impl Driver for FakeDriver {
    fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let mut state = self.live()?;
        state.visits.push(url.to_string());
        if let Some(mut hook) = state.on_goto.take() {
            hook(&mut *state, url);
            state.on_goto.get_or_insert(hook);
        }
        Ok(())
    }

    fn probe(&mut self, locator: &Locator) -> Result<Option<ElementState>, DriverError> {
        let state = self.live()?;
        Ok(state.elements.get(locator).map(|e| ElementState {
            displayed: e.displayed,
            enabled: e.enabled,
        }))
    }

    fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        let mut state = self.live()?;
        Self::element(&mut state, locator)?;
        state.actions.push(format!("click {}", locator));
        if let Some(mut hook) = state.on_click.remove(locator) {
            hook(&mut *state);
            state.on_click.entry(locator.clone()).or_insert(hook);
        }
        Ok(())
    }

    fn clear(&mut self, locator: &Locator) -> Result<(), DriverError> {
        let mut state = self.live()?;
        Self::element(&mut state, locator)?.value.clear();
        Ok(())
    }

    fn send_keys(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let mut state = self.live()?;
        Self::element(&mut state, locator)?.value.push_str(text);
        state.actions.push(format!("keys {}={}", locator, text));
        Ok(())
    }

    fn select_by_value(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        let known = {
            let mut state = self.live()?;
            Self::element(&mut state, locator)?
                .options
                .iter()
                .any(|o| o.value == value)
        };
        if !known {
            return Err(DriverError::NoSuchElement(format!(
                "option value '{}' in {}",
                value, locator
            )));
        }
        self.select(locator, value.to_string())
    }

    fn select_by_text(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let value = {
            let mut state = self.live()?;
            Self::element(&mut state, locator)?
                .options
                .iter()
                .find(|o| o.text.trim() == text)
                .map(|o| o.value.clone())
        };
        match value {
            Some(value) => self.select(locator, value),
            None => Err(DriverError::NoSuchElement(format!(
                "option text '{}' in {}",
                text, locator
            ))),
        }
    }

    fn options(&mut self, locator: &Locator) -> Result<Vec<SelectOption>, DriverError> {
        let mut state = self.live()?;
        Ok(Self::element(&mut state, locator)?.options.clone())
    }

    fn text(&mut self, locator: &Locator) -> Result<String, DriverError> {
        let mut state = self.live()?;
        Ok(Self::element(&mut state, locator)?.text.clone())
    }

    fn page_source(&mut self) -> Result<String, DriverError> {
        Ok(self.live()?.page_source.clone())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        self.handle.lock().quits += 1;
        Ok(())
    }

    fn kill_switch(&self) -> Option<KillSwitch> {
        let handle = self.handle.clone();
        Some(KillSwitch::new("fake", move || {
            let mut state = handle.lock();
            state.kills += 1;
            state.lost = true;
        }))
    }
}

type Setup = Arc<dyn Fn(&FakeHandle, &SessionSpec) + Send + Sync>;

/// Opens [`FakeDriver`] sessions, scripting each one with `setup`.
#[derive(Default)]
pub(crate) struct FakeFactory {
    setup: Option<Setup>,
    opened: AtomicUsize,
    handles: Mutex<Vec<(String, FakeHandle)>>,
}

impl FakeFactory {
    pub fn with_setup(setup: impl Fn(&FakeHandle, &SessionSpec) + Send + Sync + 'static) -> Self {
        Self {
            setup: Some(Arc::new(setup)),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handles of every session opened for `label`, oldest first.
    pub fn handles_for(&self, label: &str) -> Vec<FakeHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, h)| h.clone())
            .collect()
    }
}

impl SessionFactory for FakeFactory {
    fn open(
        &self,
        spec: &SessionSpec,
        cancel: &CancelToken,
    ) -> Result<BrowserSession, SessionError> {
        let (driver, handle) = FakeDriver::new();
        if let Some(setup) = &self.setup {
            setup(&handle, spec);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((spec.label.clone(), handle));
        BrowserSession::new(spec, Box::new(driver), cancel.clone())
    }
}
