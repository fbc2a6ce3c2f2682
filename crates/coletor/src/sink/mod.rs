//! Canonical placement of task artifacts under the output root.
//!
//! Layout: `<root>/<portal folder>/<YYYY-MM-DD>/[<side>/]<file>`, where the
//! date is the run's start date.

pub mod layout;
pub mod table;
pub mod xlsx;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::DownloadSettings;
use crate::error::StorageError;
use crate::job::Portal;
use crate::sanitize::redact_path;

pub use table::Table;
pub use xlsx::{Cell, CellStyle, Workbook};

/// Move a file from `src` to `dst`, retrying `rename` while the file is
/// briefly locked (browsers and antivirus scanners hold fresh downloads).
/// The last resort is copy + delete, which also covers cross-device moves.
fn move_file(src: &Path, dst: &Path, attempts: u32, pause: Duration) -> Result<(), StorageError> {
    for attempt in 1..=attempts.max(1) {
        match std::fs::rename(src, dst) {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(
                    file = %redact_path(src),
                    attempt,
                    error = %e,
                    "Rename failed"
                );
                if attempt < attempts {
                    std::thread::sleep(pause);
                }
            }
        }
    }

    // Slow path: copy then remove original
    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    if let Err(e) = std::fs::remove_file(src) {
        warn!(file = %redact_path(src), error = %e, "Could not remove moved download");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ResultSink {
    output_root: PathBuf,
    run_date: NaiveDate,
    rename_attempts: u32,
    rename_pause: Duration,
}

impl ResultSink {
    pub fn new<P: AsRef<Path>>(output_root: P, run_date: NaiveDate) -> Self {
        Self {
            output_root: output_root.as_ref().to_path_buf(),
            run_date,
            rename_attempts: 5,
            rename_pause: Duration::from_millis(500),
        }
    }

    pub fn with_download_settings(mut self, download: &DownloadSettings) -> Self {
        self.rename_attempts = download.rename_attempts.max(1);
        self.rename_pause = download.rename_pause();
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    /// `<root>/<portal folder>`; the run report lives here.
    pub fn portal_dir(&self, portal: Portal) -> PathBuf {
        self.output_root.join(portal.folder())
    }

    /// `<root>/<portal folder>/<YYYY-MM-DD>[/<side>]`.
    pub fn dated_dir(&self, portal: Portal, side: Option<&str>) -> PathBuf {
        let dir = self
            .portal_dir(portal)
            .join(self.run_date.format("%Y-%m-%d").to_string());
        match side {
            Some(side) => dir.join(side),
            None => dir,
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Moves a settled download to `<dated dir>/<stem>.<ext>`, keeping the
    /// download's extension. An existing file of the same name is replaced.
    pub fn store_download(
        &self,
        downloaded: &Path,
        portal: Portal,
        side: Option<&str>,
        stem: &str,
    ) -> Result<PathBuf, StorageError> {
        let size = std::fs::metadata(downloaded)
            .map_err(|e| StorageError::MoveFile {
                from: downloaded.to_path_buf(),
                to: self.dated_dir(portal, side),
                source: e,
            })?
            .len();
        if size == 0 {
            return Err(StorageError::EmptyArtifact(downloaded.to_path_buf()));
        }

        let dir = self.dated_dir(portal, side);
        self.ensure_directory(&dir)?;

        let extension = downloaded
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "dat".to_string());
        let target = dir.join(format!("{}.{}", stem, extension));
        if target.exists() {
            debug!(file = %redact_path(&target), "Replacing output from an earlier run");
            if let Err(e) = std::fs::remove_file(&target) {
                debug!(file = %redact_path(&target), error = %e, "Could not remove earlier output");
            }
        }

        move_file(downloaded, &target, self.rename_attempts, self.rename_pause)?;
        debug!(file = %redact_path(&target), size, "Download stored");
        Ok(target)
    }

    /// Removes outputs of a task that did not complete, so a failed task
    /// leaves nothing behind in the dated folders.
    pub fn discard(&self, outputs: &[PathBuf]) {
        for path in outputs {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(file = %redact_path(path), "Discarded partial output"),
                Err(e) => warn!(file = %redact_path(path), error = %e, "Could not discard output"),
            }
        }
    }

    /// Writes a rendered workbook to `<dated dir>/<file_name>`.
    pub fn write_workbook(
        &self,
        workbook: &Workbook,
        portal: Portal,
        file_name: &str,
    ) -> Result<PathBuf, StorageError> {
        let bytes = workbook.to_bytes()?;
        self.write_bytes(&bytes, portal, None, file_name)
    }

    /// Writes through a temporary sibling so a reader never sees a partial file.
    pub fn write_bytes(
        &self,
        content: &[u8],
        portal: Portal,
        side: Option<&str>,
        file_name: &str,
    ) -> Result<PathBuf, StorageError> {
        if content.is_empty() {
            return Err(StorageError::EmptyArtifact(PathBuf::from(file_name)));
        }
        let dir = self.dated_dir(portal, side);
        self.ensure_directory(&dir)?;

        let target = dir.join(file_name);
        let partial = dir.join(format!(".{}.partial", file_name));
        std::fs::write(&partial, content).map_err(|e| StorageError::WriteFile {
            path: partial.clone(),
            source: e,
        })?;
        move_file(&partial, &target, self.rename_attempts, self.rename_pause)?;
        debug!(file = %redact_path(&target), size = content.len(), "Output written");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink(tmp: &TempDir) -> ResultSink {
        ResultSink::new(
            tmp.path().join("saida"),
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        )
    }

    #[test]
    fn test_dated_dirs() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        assert_eq!(
            sink.dated_dir(Portal::EducationalFund, None),
            tmp.path().join("saida").join("fnde").join("2025-03-14")
        );
        assert!(sink
            .dated_dir(Portal::SocialDevelopment, Some("saldo"))
            .ends_with("mds/2025-03-14/saldo"));
    }

    #[test]
    fn test_store_download_renames_into_place() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        let download = tmp.path().join("relatorio (3).CSV");
        std::fs::write(&download, b"a;b\n1;2\n").unwrap();

        let stored = sink
            .store_download(&download, Portal::SocialDevelopment, Some("parcela"), "UBERLANDIA")
            .unwrap();
        assert!(stored.ends_with("mds/2025-03-14/parcela/UBERLANDIA.csv"));
        assert!(!download.exists());
        assert_eq!(std::fs::read(&stored).unwrap(), b"a;b\n1;2\n");
    }

    #[test]
    fn test_store_download_overwrites_previous_output() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        for body in [&b"old"[..], &b"new"[..]] {
            let download = tmp.path().join("saldo.xlsx");
            std::fs::write(&download, body).unwrap();
            sink.store_download(&download, Portal::HealthFundBalance, None, "ARAXA")
                .unwrap();
        }
        let stored = sink.dated_dir(Portal::HealthFundBalance, None).join("ARAXA.xlsx");
        assert_eq!(std::fs::read(stored).unwrap(), b"new");
    }

    #[test]
    fn test_discard_removes_stored_outputs() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        let download = tmp.path().join("parcela.csv");
        std::fs::write(&download, b"a;b\n").unwrap();
        let stored = sink
            .store_download(&download, Portal::SocialDevelopment, Some("parcela"), "ARAXA")
            .unwrap();

        let missing = tmp.path().join("never-written.csv");
        sink.discard(&[stored.clone(), missing]);
        assert!(!stored.exists());
    }

    #[test]
    fn test_empty_download_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        let download = tmp.path().join("empty.csv");
        std::fs::write(&download, b"").unwrap();
        assert!(matches!(
            sink.store_download(&download, Portal::HealthFundBalance, None, "ARAXA"),
            Err(StorageError::EmptyArtifact(_))
        ));
    }

    #[test]
    fn test_write_workbook_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let sink = sink(&tmp);
        let mut book = Workbook::new("t");
        book.push_styled(["x"], CellStyle::Plain);

        let path = sink
            .write_workbook(&book, Portal::EducationalFund, "2023_ARAXA.xlsx")
            .unwrap();
        assert!(path.exists());
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
