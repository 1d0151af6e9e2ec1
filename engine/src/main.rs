// OODA benchmark agent
// Main entry point for the `ooda` binary

use clap::Parser;
use ooda_engine::cli::Cli;
use ooda_engine::config::Config;
use ooda_engine::handlers::{handle_run, OutputFormat};
use ooda_engine::telemetry::init_telemetry_with_level;
use sdk::AgentErrorExt;
use sdk::EngineError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // API keys may live in a .env next to the working directory
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {}", e);
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load_or_create(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            report(&e);
            return Err(e.into());
        }
    };

    // --log beats the config; RUST_LOG beats both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!(
        "OODA agent v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    handle_run(&cli, &config, format).inspect_err(|e| {
        if let Some(engine_error) = e.downcast_ref::<EngineError>() {
            report(engine_error);
        }
    })
}

fn report(error: &EngineError) {
    eprintln!("Error: {}", error);
    eprintln!("Hint: {}", error.user_hint());
}
