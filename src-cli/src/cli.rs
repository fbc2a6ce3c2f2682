use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "coletor")]
#[command(about = "Collects municipal data from public-sector portals", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to coletor.json in the config directory)
    #[arg(long, global = true, env = "COLETOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Municipality list, one name per line
    #[arg(long, global = true)]
    pub municipality_file: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect one portal for one or every municipality
    Run(RunArgs),
    /// List the municipality catalog
    Municipalities,
    /// Load and validate the settings, then print the resolved paths
    CheckConfig,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// federal_transfer, educational_fund, health_fund_balance,
    /// social_development or resolution_payments (short names accepted)
    #[arg(long, short)]
    pub portal: String,

    #[arg(long)]
    pub year: Option<i32>,

    #[arg(long)]
    pub month: Option<u32>,

    /// First day of a date range (dd/mm/yyyy or yyyy-mm-dd)
    #[arg(long)]
    pub start: Option<String>,

    /// Last day of a date range, inclusive
    #[arg(long)]
    pub end: Option<String>,

    /// One municipality; omit for the whole catalog
    #[arg(long, short)]
    pub municipality: Option<String>,

    /// Parallel browsers (1 to 5); omit for a sequential run
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Output root directory
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Print progress events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Text,
    Json,
}
