//! CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use piperlink_cli::{bootstrap, handlers, logging, Cli, CliError, Commands};

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.bridge.into_config()?;

    match cli.command {
        Some(Commands::Voices { json }) => {
            let registry = bootstrap::registry(&config);
            handlers::voices::execute(registry.as_ref(), json).await?;
        }
        None => {
            let bridge = bootstrap(config).await?;
            handlers::serve::execute(bridge).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads PIPERLINK_* variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.debug, cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "piperlink failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(e.downcast_ref::<CliError>().map_or(1, CliError::exit_code))
        }
    }
}
