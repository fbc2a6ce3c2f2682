//! SES-MG resolutions: payment spreadsheets and the deliberation PDFs.
//!
//! The site serves an outdated certificate chain, so its sessions accept
//! invalid certificates, and its forms keep state between searches, so every
//! session goes back to the landing page after each task.

use super::DualPageAdapter;
use crate::config::{DownloadSettings, PortalSettings};
use crate::error::ConfigError;
use crate::job::Portal;

pub fn adapter(
    settings: &PortalSettings,
    download: &DownloadSettings,
) -> Result<DualPageAdapter, ConfigError> {
    DualPageAdapter::new(Portal::ResolutionPayments, settings, download)
}
