// Parley conversational assistant
// Main entry point for the parley binary

use clap::Parser;
use parley_engine::cli::{Cli, Command};
use parley_engine::config::Config;
use parley_engine::handlers::{
    handle_ask, handle_chat, handle_clear, handle_doctor, handle_memory, handle_telegram,
    OutputFormat,
};
use parley_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Parley v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Chat { user, ephemeral } => {
            tracing::info!("Starting console chat as {}", user);
            handle_chat(user, ephemeral, &config).await
        }

        Command::Ask { user, text } => handle_ask(user, text, &config, format).await,

        Command::Telegram => {
            tracing::info!("Starting Telegram transport...");
            handle_telegram(&config).await
        }

        Command::Memory { user } => handle_memory(user, &config, format).await,

        Command::Clear { user } => {
            tracing::info!("Clearing memory for {}", user);
            handle_clear(user, &config).await
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
