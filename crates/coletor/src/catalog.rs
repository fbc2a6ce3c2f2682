//! The canonical list of the state's municipalities.
//!
//! Loaded once per process from a UTF-8 file (one name per line) and shared
//! read-only afterwards. There is deliberately no built-in fallback list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::sanitize::normalize_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MunicipalityCatalog {
    source: Option<PathBuf>,
    names: Vec<String>,
}

impl MunicipalityCatalog {
    /// Builds a catalog from already-known names, dropping blanks and repeats.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .filter(|n| seen.insert(normalize_name(n)))
            .collect();
        Self {
            source: None,
            names,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.is_file() {
            return Err(CatalogError::Missing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let raw_count = content.lines().filter(|l| !l.trim().is_empty()).count();
        let mut catalog = Self::from_names(content.lines());
        if catalog.names.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }
        if catalog.names.len() != raw_count {
            warn!(
                duplicates = raw_count - catalog.names.len(),
                "Municipality file contains repeated names"
            );
        }
        catalog.source = Some(path.to_path_buf());
        Ok(catalog)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the stored spelling of `name`, compared case- and accent-insensitively.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let wanted = normalize_name(name);
        self.names
            .iter()
            .find(|stored| normalize_name(stored) == wanted)
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

static CATALOG: RwLock<Option<Arc<MunicipalityCatalog>>> = RwLock::new(None);

/// Process-wide catalog, loaded from `path` on first use.
///
/// Later calls return the cached instance regardless of `path` until
/// [`clear_cache`] is called.
pub fn global(path: &Path) -> Result<Arc<MunicipalityCatalog>, CatalogError> {
    if let Ok(guard) = CATALOG.read() {
        if let Some(catalog) = guard.as_ref() {
            return Ok(Arc::clone(catalog));
        }
    }

    let mut guard = CATALOG.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another thread may have loaded it while we waited for the write lock.
    if let Some(catalog) = guard.as_ref() {
        return Ok(Arc::clone(catalog));
    }

    let catalog = Arc::new(MunicipalityCatalog::load(path)?);
    info!(
        count = catalog.len(),
        path = %path.display(),
        "Municipality catalog loaded"
    );
    *guard = Some(Arc::clone(&catalog));
    Ok(catalog)
}

/// Drops the cached catalog so the next [`global`] call reloads it.
pub fn clear_cache() {
    let mut guard = CATALOG.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.take().is_some() {
        debug!("Municipality catalog cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_catalog(lines: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", lines).unwrap();
        file
    }

    #[test]
    fn test_load_skips_empty_lines() {
        let file = write_catalog("ABADIA DOS DOURADOS\n\nABAETE\n   \nUBERLANDIA\n");
        let catalog = MunicipalityCatalog::load(file.path()).unwrap();
        assert_eq!(
            catalog.names(),
            &["ABADIA DOS DOURADOS", "ABAETE", "UBERLANDIA"]
        );
    }

    #[test]
    fn test_missing_file_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let result = MunicipalityCatalog::load(&dir.path().join("municipios.txt"));
        assert!(matches!(result, Err(CatalogError::Missing(_))));
    }

    #[test]
    fn test_file_with_only_blanks_is_rejected() {
        let file = write_catalog("\n \n\n");
        assert!(matches!(
            MunicipalityCatalog::load(file.path()),
            Err(CatalogError::Empty(_))
        ));
    }

    #[test]
    fn test_resolve_ignores_case_and_accents() {
        let catalog = MunicipalityCatalog::from_names(["UBERLANDIA", "BELO HORIZONTE"]);
        assert_eq!(catalog.resolve("Uberlândia"), Some("UBERLANDIA"));
        assert_eq!(catalog.resolve("belo  horizonte"), Some("BELO HORIZONTE"));
        assert_eq!(catalog.resolve("CONTAGEM"), None);
    }

    #[test]
    fn test_duplicates_are_dropped_in_order() {
        let catalog = MunicipalityCatalog::from_names(["ARAXA", "BETIM", "Araxá"]);
        assert_eq!(catalog.names(), &["ARAXA", "BETIM"]);
    }

    #[test]
    #[serial]
    fn test_global_is_loaded_once_until_cleared() {
        clear_cache();
        let first = write_catalog("ARAXA\nBETIM\n");
        let second = write_catalog("CONTAGEM\n");

        let a = global(first.path()).unwrap();
        let b = global(second.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.names(), &["ARAXA", "BETIM"]);

        clear_cache();
        let c = global(second.path()).unwrap();
        assert_eq!(c.names(), &["CONTAGEM"]);
        clear_cache();
    }

    #[test]
    #[serial]
    fn test_global_concurrent_first_reads() {
        clear_cache();
        let file = write_catalog("ARAXA\nBETIM\nCONTAGEM\n");
        let path = file.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || global(&path).unwrap())
            })
            .collect();
        let catalogs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for c in &catalogs[1..] {
            assert!(Arc::ptr_eq(&catalogs[0], c));
        }
        clear_cache();
    }
}
