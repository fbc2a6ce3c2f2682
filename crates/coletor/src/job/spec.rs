use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::portal::Portal;
use crate::catalog::MunicipalityCatalog;
use crate::error::PreflightError;

/// Longest inclusive date range a date-range portal accepts.
pub const MAX_RANGE_DAYS: i64 = 31;

/// Upper bound on cooperating browser workers.
pub const MAX_WORKERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    None,
    Year,
    YearMonth,
    DateRange,
}

impl PeriodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::None => "none",
            PeriodKind::Year => "year",
            PeriodKind::YearMonth => "year+month",
            PeriodKind::DateRange => "date range",
        }
    }
}

/// Portal-specific reference period of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Period {
    /// Portals that always report the current state (balances).
    None,
    Year { year: i32 },
    YearMonth { year: i32, month: u32 },
    /// Inclusive on both ends.
    DateRange { start: NaiveDate, end: NaiveDate },
}

impl Period {
    pub fn kind(&self) -> PeriodKind {
        match self {
            Period::None => PeriodKind::None,
            Period::Year { .. } => PeriodKind::Year,
            Period::YearMonth { .. } => PeriodKind::YearMonth,
            Period::DateRange { .. } => PeriodKind::DateRange,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            Period::Year { year } | Period::YearMonth { year, .. } => Some(*year),
            Period::DateRange { start, .. } => Some(chrono::Datelike::year(start)),
            Period::None => None,
        }
    }

    pub fn month(&self) -> Option<u32> {
        match self {
            Period::YearMonth { month, .. } => Some(*month),
            _ => None,
        }
    }

    /// Number of days covered by a date range, counting both ends.
    pub fn range_days(&self) -> Option<i64> {
        match self {
            Period::DateRange { start, end } => Some((*end - *start).num_days() + 1),
            _ => None,
        }
    }

    /// Checks internal consistency and the kind expected by `portal`.
    pub fn validate_for(&self, portal: Portal) -> Result<(), PreflightError> {
        let expected = portal.period_kind();
        if self.kind() != expected {
            return Err(PreflightError::PeriodMismatch {
                portal,
                expected: expected.as_str(),
            });
        }

        match self {
            Period::None => Ok(()),
            Period::Year { year } => validate_year(*year),
            Period::YearMonth { year, month } => {
                validate_year(*year)?;
                if !(1..=12).contains(month) {
                    return Err(PreflightError::InvalidPeriod(format!(
                        "month {} is out of range",
                        month
                    )));
                }
                Ok(())
            }
            Period::DateRange { start, end } => {
                if end < start {
                    return Err(PreflightError::InvalidPeriod(format!(
                        "range ends ({}) before it starts ({})",
                        end, start
                    )));
                }
                let days = (*end - *start).num_days() + 1;
                if days > MAX_RANGE_DAYS {
                    return Err(PreflightError::PeriodTooLong {
                        days,
                        max: MAX_RANGE_DAYS,
                    });
                }
                Ok(())
            }
        }
    }
}

fn validate_year(year: i32) -> Result<(), PreflightError> {
    if !(1990..=2100).contains(&year) {
        return Err(PreflightError::InvalidPeriod(format!(
            "year {} is out of range",
            year
        )));
    }
    Ok(())
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::None => write!(f, "posição atual"),
            Period::Year { year } => write!(f, "{}", year),
            Period::YearMonth { year, month } => write!(f, "{:02}/{}", month, year),
            Period::DateRange { start, end } => write!(
                f,
                "{} a {}",
                start.format("%d/%m/%Y"),
                end.format("%d/%m/%Y")
            ),
        }
    }
}

/// Which municipalities a job covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    All,
    One(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel(usize),
}

impl ExecutionMode {
    pub fn requested_workers(self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel(n) => n,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequencial"),
            ExecutionMode::Parallel(n) => write!(f, "paralelo ({} workers)", n),
        }
    }
}

/// Immutable description of one run, produced by the UI façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub portal: Portal,
    pub period: Period,
    pub target: Target,
    pub mode: ExecutionMode,
    pub output_root: PathBuf,
}

impl JobSpec {
    pub fn new(
        portal: Portal,
        period: Period,
        target: Target,
        mode: ExecutionMode,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            portal,
            period,
            target,
            mode,
            output_root: output_root.into(),
        }
    }

    /// Expands the target into catalog names, in catalog order.
    ///
    /// A single named target is resolved to the catalog's stored spelling.
    pub fn expand_target(
        &self,
        catalog: &MunicipalityCatalog,
    ) -> Result<Vec<String>, PreflightError> {
        let names = match &self.target {
            Target::All => catalog.names().to_vec(),
            Target::One(name) => {
                let stored = catalog
                    .resolve(name)
                    .ok_or_else(|| PreflightError::UnknownMunicipality(name.clone()))?;
                vec![stored.to_string()]
            }
        };

        if names.is_empty() {
            return Err(PreflightError::EmptyTarget);
        }
        Ok(names)
    }

    /// Number of workers actually launched for `task_count` tasks.
    pub fn effective_workers(&self, task_count: usize) -> usize {
        self.mode
            .requested_workers()
            .clamp(1, MAX_WORKERS)
            .min(task_count.max(1))
    }

    pub fn validate_mode(&self) -> Result<(), PreflightError> {
        if let ExecutionMode::Parallel(n) = self.mode {
            if n == 0 || n > MAX_WORKERS {
                return Err(PreflightError::InvalidWorkers {
                    requested: n,
                    max: MAX_WORKERS,
                });
            }
        }
        Ok(())
    }
}
