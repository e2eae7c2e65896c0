mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GlobalOpts, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(global: &GlobalOpts) -> Result<wanlink_config::Config, CliError> {
    Ok(wanlink_config::load_config(global.config.as_deref())?)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Bare `wanlink` is the scheduled entry point: one full run.
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(cli::RunArgs::default()));
    match command {
        // Config commands never open stores or touch the network.
        Command::Config(cmd) => commands::config_cmd::handle(&cmd, &cli.global),
        Command::Run(args) => commands::run::handle(args, &load_config(&cli.global)?).await,
        Command::Import(args) => commands::import::handle(args, &load_config(&cli.global)?),
        Command::Resolve(args) => {
            commands::resolve::handle(args, &load_config(&cli.global)?).await
        }
    }
}
