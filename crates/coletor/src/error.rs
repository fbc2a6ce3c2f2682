use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::job::{ErrorKind, Portal};

#[derive(Error, Debug)]
pub enum ColetorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Browser session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pre-flight check failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid locator '{value}': {reason}")]
    InvalidLocator { value: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Municipality file not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read municipality file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Municipality file '{0}' contains no names")]
    Empty(PathBuf),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Page '{url}' did not become ready within {waited:?}")]
    NavigationTimeout { url: String, waited: Duration },

    #[error("Element '{locator}' not ready within {waited:?}")]
    ElementTimeout { locator: String, waited: Duration },

    #[error("No finished download appeared in '{directory}' within {waited:?}")]
    DownloadTimeout { directory: PathBuf, waited: Duration },

    #[error("Action on '{locator}' failed: {message}")]
    Action { locator: String, message: String },

    #[error("Browser session is unusable: {0}")]
    BrowserFatal(String),

    #[error("Failed to start browser session: {0}")]
    Startup(String),

    #[error("Download directory error at '{path}': {source}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cancelled")]
    Cancelled,
}

impl SessionError {
    /// Behavioural classification recorded on a failed task.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            SessionError::ElementTimeout { .. } | SessionError::Action { .. } => {
                ErrorKind::ElementTimeout
            }
            SessionError::DownloadTimeout { .. } => ErrorKind::DownloadTimeout,
            SessionError::BrowserFatal(_) | SessionError::Startup(_) => ErrorKind::BrowserFatal,
            SessionError::DownloadDir { .. } => ErrorKind::Storage,
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt on the same (or a rebuilt) session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::NavigationTimeout { .. }
                | SessionError::ElementTimeout { .. }
                | SessionError::DownloadTimeout { .. }
                | SessionError::Action { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{0}' is empty")]
    EmptyArtifact(PathBuf),

    #[error("Failed to build workbook: {0}")]
    Workbook(String),

    #[error("Failed to extract table: {0}")]
    Table(String),
}

/// Failure of one step inside an adapter. Never crosses the adapter
/// boundary: it is folded into the task's result.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Municipality '{0}' is not offered by the portal")]
    MunicipalityNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Session(e) => e.kind(),
            AdapterError::MunicipalityNotFound(_) => ErrorKind::MunicipalityNotFound,
            AdapterError::Storage(_) => ErrorKind::Storage,
            AdapterError::Config(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AdapterError::Session(SessionError::Cancelled))
    }

    /// The browser is gone and the session must be rebuilt before retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Session(SessionError::BrowserFatal(_) | SessionError::Startup(_))
        )
    }

    /// Whether the task may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Session(e) => e.is_transient() || self.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Output root '{path}' is not writable: {source}")]
    OutputRootUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Municipality '{0}' is not in the catalog")]
    UnknownMunicipality(String),

    #[error("Portal {portal} expects a period of kind '{expected}'")]
    PeriodMismatch { portal: Portal, expected: &'static str },

    #[error("Period too long: {days} days requested, at most {max} allowed")]
    PeriodTooLong { days: i64, max: i64 },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("No adapter registered for portal {0}")]
    NoAdapter(Portal),

    #[error("Worker count must be between 1 and {max}, got {requested}")]
    InvalidWorkers { requested: usize, max: usize },

    #[error("Nothing to do: the target expands to no municipalities")]
    EmptyTarget,

    #[error("Unknown portal '{0}'")]
    UnknownPortal(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Run thread panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, ColetorError>;
