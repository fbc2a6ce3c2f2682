//! Isolated directories and an orchestrator wired to them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use coletor::config::{InstallMode, PathResolver, Settings};
use coletor::job::{ExecutionMode, JobSpec, Period, Portal, Target};
use coletor::orchestrator::Orchestrator;
use coletor::portal::{AdapterRegistry, PortalAdapter};
use coletor::session::SessionFactory;

pub struct TestHarness {
    temp_dir: TempDir,
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub municipality_file: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        Self {
            output_dir: base.join("saida"),
            scratch_dir: base.join("scratch"),
            municipality_file: base.join("municipios.txt"),
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes the municipality file, one name per line.
    pub fn write_catalog(&self, names: &[&str]) -> &Path {
        std::fs::write(&self.municipality_file, names.join("\n"))
            .expect("Failed to write municipality file");
        &self.municipality_file
    }

    pub fn paths(&self) -> PathResolver {
        PathResolver::for_mode(InstallMode::Dev, self.temp_dir.path())
            .with_output_root(&self.output_dir)
            .with_scratch_dir(&self.scratch_dir)
            .with_municipality_file(&self.municipality_file)
    }

    /// Orchestrator with one adapter, reading the catalog from this harness.
    pub fn orchestrator(
        &self,
        adapter: impl PortalAdapter + 'static,
        factory: Arc<dyn SessionFactory>,
    ) -> Orchestrator {
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(adapter));
        let catalog = coletor::catalog::MunicipalityCatalog::load(&self.municipality_file)
            .expect("Failed to load municipality file");
        Orchestrator::new(Settings::default(), self.paths(), adapters, factory)
            .with_catalog(Arc::new(catalog))
    }

    pub fn spec(&self, portal: Portal, period: Period, target: Target, mode: ExecutionMode) -> JobSpec {
        JobSpec::new(portal, period, target, mode, &self.output_dir)
    }

    /// Every file under the output root, relative to it, sorted.
    pub fn output_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect(&self.output_dir, &self.output_dir, &mut files);
        files.sort();
        files
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}
