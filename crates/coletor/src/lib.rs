pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod facade;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod portal;
pub mod progress;
pub mod report;
pub mod sanitize;
pub mod session;
pub mod sink;
pub mod worker;

pub use cancel::CancelToken;
pub use catalog::MunicipalityCatalog;
pub use config::{load_settings, PathResolver, Settings};
pub use error::{
    AdapterError, CatalogError, ColetorError, ConfigError, PreflightError, Result, SessionError,
    StorageError, WorkerError,
};
pub use facade::{exit_code, spawn_run, RunHandle, RunRequest};
pub use job::{
    ErrorKind, ExecutionMode, JobSpec, Period, Portal, Target, Task, TaskResult, TaskStatus,
};
pub use orchestrator::Orchestrator;
pub use portal::{AdapterRegistry, PortalAdapter};
pub use progress::{ProgressBroadcaster, ProgressEvent, ProgressReporter, RunPhase};
pub use report::{RunOutcome, RunReporter, RunStatistics};
pub use session::{Driver, SessionFactory};
pub use sink::ResultSink;
