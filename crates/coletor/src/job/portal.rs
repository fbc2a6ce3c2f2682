use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::spec::PeriodKind;

/// One of the public-sector portals the collector knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    /// Banco do Brasil demonstrative of federal revenue transfers.
    FederalTransfer,
    /// FNDE disbursements to municipal governments.
    EducationalFund,
    /// FNS account balances per municipality.
    HealthFundBalance,
    /// MDS installments paid and account balances (two pages per municipality).
    SocialDevelopment,
    /// State health resolutions: payments plus the deliberations repository.
    ResolutionPayments,
}

impl Portal {
    pub const ALL: [Portal; 5] = [
        Portal::FederalTransfer,
        Portal::EducationalFund,
        Portal::HealthFundBalance,
        Portal::SocialDevelopment,
        Portal::ResolutionPayments,
    ];

    /// Stable identifier used in settings files and on the command line.
    pub fn tag(self) -> &'static str {
        match self {
            Portal::FederalTransfer => "federal_transfer",
            Portal::EducationalFund => "educational_fund",
            Portal::HealthFundBalance => "health_fund_balance",
            Portal::SocialDevelopment => "social_development",
            Portal::ResolutionPayments => "resolution_payments",
        }
    }

    /// Directory under the output root that receives this portal's files.
    pub fn folder(self) -> &'static str {
        match self {
            Portal::FederalTransfer => "transferencias_federais",
            Portal::EducationalFund => "fnde",
            Portal::HealthFundBalance => "fns_saldos",
            Portal::SocialDevelopment => "mds",
            Portal::ResolutionPayments => "resolucoes",
        }
    }

    /// Code embedded in the report file name.
    pub fn report_code(self) -> &'static str {
        match self {
            Portal::FederalTransfer => "TRANSFERENCIAS_FEDERAIS",
            Portal::EducationalFund => "FNDE",
            Portal::HealthFundBalance => "FNS",
            Portal::SocialDevelopment => "MDS",
            Portal::ResolutionPayments => "RESOLUCOES",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Portal::FederalTransfer => "Transferências Federais (Banco do Brasil)",
            Portal::EducationalFund => "FNDE - Liberações",
            Portal::HealthFundBalance => "FNS - Saldos em Conta",
            Portal::SocialDevelopment => "MDS - Parcelas e Saldos",
            Portal::ResolutionPayments => "SES - Pagamentos de Resoluções",
        }
    }

    pub fn period_kind(self) -> PeriodKind {
        match self {
            Portal::FederalTransfer => PeriodKind::DateRange,
            Portal::EducationalFund => PeriodKind::Year,
            Portal::HealthFundBalance => PeriodKind::None,
            Portal::SocialDevelopment => PeriodKind::YearMonth,
            Portal::ResolutionPayments => PeriodKind::Year,
        }
    }

    /// Portals whose form pages are driven side by side by separate sessions.
    pub fn is_dual(self) -> bool {
        matches!(
            self,
            Portal::SocialDevelopment | Portal::ResolutionPayments
        )
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Portal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let portal = match normalized.as_str() {
            "federal_transfer" | "bb" | "transferencias" | "transferencias_federais" => {
                Portal::FederalTransfer
            }
            "educational_fund" | "fnde" => Portal::EducationalFund,
            "health_fund_balance" | "fns" | "fns_saldos" => Portal::HealthFundBalance,
            "social_development" | "mds" => Portal::SocialDevelopment,
            "resolution_payments" | "resolucoes" | "ses" => Portal::ResolutionPayments,
            _ => return Err(format!("unknown portal '{}'", s)),
        };
        Ok(portal)
    }
}
