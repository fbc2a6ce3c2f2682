//! Registry of live browsers that can be hard-killed from any thread.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use super::driver::KillSwitch;
use crate::cancel::CancelToken;

#[derive(Debug, Clone, Default)]
pub struct KillRegistry {
    switches: Arc<Mutex<BTreeMap<String, KillSwitch>>>,
}

impl KillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, KillSwitch>> {
        self.switches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, label: &str, switch: KillSwitch) {
        self.lock().insert(label.to_string(), switch);
    }

    pub fn unregister(&self, label: &str) {
        self.lock().remove(label);
    }

    pub fn labels(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fires and removes every registered switch. Returns how many fired.
    pub fn kill_all(&self) -> usize {
        let switches: Vec<KillSwitch> = std::mem::take(&mut *self.lock()).into_values().collect();
        for switch in &switches {
            warn!("Hard-killing browser '{}'", switch.label());
            switch.fire();
        }
        switches.len()
    }
}

/// Hard-kills browsers that are still registered `grace` after cancellation.
///
/// Stops without killing anything when the run finishes first.
pub struct Watchdog {
    done: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(registry: KillRegistry, cancel: CancelToken, grace: Duration) -> Self {
        let done = CancelToken::new();
        let finished = done.clone();

        let handle = thread::spawn(move || {
            while !cancel.is_cancelled() {
                if !finished.sleep(Duration::from_millis(100)) {
                    return;
                }
            }
            debug!("Watchdog armed, grace period {:?}", grace);
            if !finished.sleep(grace) {
                return;
            }
            let killed = registry.kill_all();
            if killed > 0 {
                warn!("Watchdog killed {} browser(s) after cancellation", killed);
            }
        });

        Self {
            done,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.done.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                error!("Watchdog panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
