//! Decider CLI entrypoint.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod commands;
mod config;
mod handlers;
mod source;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod handlers_tests;
#[cfg(test)]
mod source_tests;

use commands::{Commands, ConfigCommands, LogFormat};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "decider")]
#[command(author, version, about = "Decider CI decision engine", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn dispatch(command: Commands, config: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Run(args) => handlers::run(config, args).await,
        Commands::Table => handlers::table(config),
        Commands::Artifact {
            job_id,
            path,
            output,
        } => handlers::artifact(config, &job_id, &path, output).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(config),
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value),
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = CliConfig::load().unwrap_or_default();

    if let Err(e) = dispatch(cli.command, &config).await {
        error!(error = %e, "decider failed");
        eprintln!("{} {}", console::style("✗").red(), e);
        std::process::exit(1);
    }
}
