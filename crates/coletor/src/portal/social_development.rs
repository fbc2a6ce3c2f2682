//! MDS SUAS payments: the installments page and the account-balance page,
//! both per year, the installments page also per month.

use super::DualPageAdapter;
use crate::config::{DownloadSettings, PortalSettings};
use crate::error::ConfigError;
use crate::job::Portal;

pub fn adapter(
    settings: &PortalSettings,
    download: &DownloadSettings,
) -> Result<DualPageAdapter, ConfigError> {
    DualPageAdapter::new(Portal::SocialDevelopment, settings, download)
}
