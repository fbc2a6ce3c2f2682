//! Where settings, the municipality list, outputs and scratch downloads live.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::schema::Settings;

pub const APP_DIR: &str = "coletor";
pub const SETTINGS_FILE: &str = "coletor.json";
pub const MUNICIPALITY_FILE: &str = "municipios.txt";
pub const MODE_ENV: &str = "COLETOR_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Installed binary: per-user OS directories.
    Packaged,
    /// Running from a checkout: everything under the working directory.
    Dev,
}

impl InstallMode {
    /// `COLETOR_MODE` wins; otherwise a binary inside a cargo `target/`
    /// directory means dev.
    pub fn detect() -> Self {
        if let Some(mode) = std::env::var(MODE_ENV)
            .ok()
            .and_then(|v| Self::from_env_value(&v))
        {
            return mode;
        }
        let in_target = std::env::current_exe()
            .map(|exe| exe.components().any(|c| c.as_os_str() == "target"))
            .unwrap_or(false);
        if in_target {
            InstallMode::Dev
        } else {
            InstallMode::Packaged
        }
    }

    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "packaged" | "installed" | "prod" => Some(InstallMode::Packaged),
            "dev" | "development" => Some(InstallMode::Dev),
            _ => None,
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Packaged => write!(f, "packaged"),
            InstallMode::Dev => write!(f, "dev"),
        }
    }
}

/// Single owner of path decisions. Everything else takes paths as parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    mode: InstallMode,
    config_dir: PathBuf,
    municipality_file: PathBuf,
    output_root: PathBuf,
    scratch_dir: PathBuf,
}

impl PathResolver {
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_mode(InstallMode::detect(), &cwd)
    }

    pub fn for_mode(mode: InstallMode, cwd: &Path) -> Self {
        let resolver = match mode {
            InstallMode::Dev => Self {
                mode,
                config_dir: cwd.to_path_buf(),
                municipality_file: cwd.join(MUNICIPALITY_FILE),
                output_root: cwd.join("saida"),
                scratch_dir: cwd.join(".coletor").join("downloads"),
            },
            InstallMode::Packaged => {
                let config_dir = dirs::config_dir()
                    .map(|d| d.join(APP_DIR))
                    .unwrap_or_else(|| cwd.join(format!(".{}", APP_DIR)));
                let output_root = dirs::document_dir()
                    .or_else(dirs::home_dir)
                    .map(|d| d.join("Coletor"))
                    .unwrap_or_else(|| cwd.join("Coletor"));
                let scratch_dir = dirs::cache_dir()
                    .map(|d| d.join(APP_DIR).join("downloads"))
                    .unwrap_or_else(|| config_dir.join("downloads"));
                Self {
                    mode,
                    municipality_file: config_dir.join(MUNICIPALITY_FILE),
                    config_dir,
                    output_root,
                    scratch_dir,
                }
            }
        };
        debug!(mode = %mode, config_dir = %resolver.config_dir.display(), "Paths resolved");
        resolver
    }

    /// Applies the locations set in a settings file.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(root) = &settings.output_root {
            self.output_root = root.clone();
        }
        if let Some(file) = &settings.municipality_file {
            self.municipality_file = file.clone();
        }
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_municipality_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.municipality_file = file.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn municipality_file(&self) -> &Path {
        &self.municipality_file
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Scratch directory private to one run.
    pub fn run_scratch_dir(&self, run_id: &str) -> PathBuf {
        self.scratch_dir.join(run_id)
    }
}
