//! Per-portal state machines and the registry the orchestrator picks them from.
//!
//! An adapter turns one task into a [`TaskResult`]. It never returns an error:
//! every failure is folded into the result so the run carries on.

pub mod dual;
pub mod educational_fund;
pub mod federal_transfer;
pub mod health_fund;
pub mod matching;
pub mod resolution_payments;
pub mod social_development;
pub mod steps;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::ConfigError;
use crate::job::{Portal, Task, TaskResult};
use crate::session::{InteractionPolicy, SessionSet, SessionSpec};
use crate::sink::ResultSink;

pub use dual::DualPageAdapter;
pub use educational_fund::EducationalFundAdapter;
pub use federal_transfer::FederalTransferAdapter;
pub use health_fund::HealthFundAdapter;
pub use steps::{AttemptPolicy, Outcome};

/// Label of the only session a single-page portal uses.
pub const MAIN_SIDE: &str = "main";

/// One browser session an adapter needs per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNeed {
    /// Also the session's label suffix and download sub-directory.
    pub side: String,
    pub relaxed_tls: bool,
    pub policy: InteractionPolicy,
}

/// What an adapter borrows for one task.
pub struct AdapterContext<'a> {
    /// One session per [`SessionNeed`], in the same order.
    pub sessions: &'a mut SessionSet,
    pub sink: &'a ResultSink,
}

pub trait PortalAdapter: Send + Sync {
    fn portal(&self) -> Portal;

    /// The sessions a worker must hold to run this adapter.
    fn sessions(&self) -> Vec<SessionNeed>;

    /// Drives the portal from its landing page to a materialized result and
    /// leaves the sessions ready for the next task.
    fn execute(&self, task: &Task, ctx: &mut AdapterContext<'_>) -> TaskResult;
}

/// Session specs for one worker. Labels (`w<N>-<side>`) and download
/// directories are unique per worker and side, so no two sessions of a run
/// ever share a download directory.
pub fn session_specs(adapter: &dyn PortalAdapter, scratch: &Path, worker_id: usize) -> Vec<SessionSpec> {
    adapter
        .sessions()
        .into_iter()
        .map(|need| {
            let label = format!("w{}-{}", worker_id, need.side);
            SessionSpec::new(label.clone(), scratch.join(label))
                .with_relaxed_tls(need.relaxed_tls)
                .with_policy(need.policy)
        })
        .collect()
}

/// Adapters keyed by portal.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Portal, Arc<dyn PortalAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five built-in adapters, configured from `settings`.
    pub fn builtin(settings: &Settings) -> Result<Self, ConfigError> {
        let portals = &settings.portals;
        let download = &settings.download;

        let mut registry = Self::new();
        registry.register(Arc::new(FederalTransferAdapter::new(
            &portals.federal_transfer,
            download,
        )?));
        registry.register(Arc::new(EducationalFundAdapter::new(
            &portals.educational_fund,
            download,
        )?));
        registry.register(Arc::new(HealthFundAdapter::new(
            &portals.health_fund_balance,
            download,
        )?));
        registry.register(Arc::new(social_development::adapter(
            &portals.social_development,
            download,
        )?));
        registry.register(Arc::new(resolution_payments::adapter(
            &portals.resolution_payments,
            download,
        )?));
        Ok(registry)
    }

    /// Adds or replaces the adapter for its portal.
    pub fn register(&mut self, adapter: Arc<dyn PortalAdapter>) {
        self.adapters.insert(adapter.portal(), adapter);
    }

    pub fn get(&self, portal: Portal) -> Option<Arc<dyn PortalAdapter>> {
        self.adapters.get(&portal).cloned()
    }

    pub fn portals(&self) -> Vec<Portal> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("portals", &self.portals())
            .finish()
    }
}
