//! Conductor CLI entry point.

use clap::Parser;

use conductor::cli::{self, Cli, Commands};
use conductor::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => cli::handle_error(err, cli.json),
    };

    let mut log_config = LogConfig::from(&config.logging);
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => logger,
        Err(err) => cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Validate(args) => cli::commands::validate::execute(args, &config, cli.json).await,
        Commands::Run(args) => cli::commands::run::execute(args, &config, cli.json).await,
        Commands::Inspect(args) => cli::commands::inspect::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        cli::handle_error(err, cli.json);
    }
}
