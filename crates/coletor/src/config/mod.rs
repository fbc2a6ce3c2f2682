pub mod defaults;
pub mod loader;
pub mod paths;
pub mod schema;

pub use defaults::CONFIG_VERSION;
pub use loader::{load_settings, load_settings_from_str, validate_settings};
pub use paths::{InstallMode, PathResolver};
pub use schema::{
    DownloadSettings, FieldInput, FieldSettings, FieldSource, Pauses, PortalSettings,
    PortalsSettings, ReportSettings, RunSettings, Settings, SideSettings, Timeouts,
    WebDriverSettings,
};
