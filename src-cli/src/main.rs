mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, LogFormatArg};
use coletor::logging::{self, LogFormat};

fn main() {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    };
    if let Err(e) = logging::init(format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let code = match &cli.command {
        Commands::Run(args) => commands::run(&cli, args),
        Commands::Municipalities => commands::municipalities(&cli),
        Commands::CheckConfig => commands::check_config(&cli),
    };
    std::process::exit(code);
}
