use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use conductor_cli::{
    cli::{Cli, Commands},
    commands, config, is_interrupted, is_protocol_violation, EXIT_INTERRUPTED,
    EXIT_PROTOCOL_VIOLATION,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Diagnostics always go to stderr; stdout may carry protocol traffic
    let level = cli.level_filter().to_string().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "conductor_cli={level},conductor_observe={level},conductor_config={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_interrupted(&err) => {
            eprintln!("{err}");
            // Sessions are flushed; a blocked stdin read must not hold up exit
            std::process::exit(EXIT_INTERRUPTED.into());
        }
        Err(err) if is_protocol_violation(&err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::from(EXIT_PROTOCOL_VIOLATION)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load(&cli)?;

    match cli.command {
        Commands::Run {
            command,
            steps,
            delay_ms,
            session,
        } => commands::run::execute(config, command, steps, delay_ms, session).await,
        Commands::Sessions(cmd) => commands::sessions::execute(config, cmd).await,
        Commands::Probe { format } => commands::probe::execute(config, format).await,
        Commands::Serve => commands::serve::execute(config).await,
    }
}
