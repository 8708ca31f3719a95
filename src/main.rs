//! playsession - media playback session controller
//!
//! # Usage
//!
//! ```bash
//! playsession simulate https://cdn/a.m3u8 --backup https://cdn/b.m3u8 --fail 1
//! playsession cast-payload https://cdn/a.mpd --caption en --json
//! playsession config
//! ```

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use playsession::cli::{Cli, Command, ExitCode, Output};
use playsession::commands;
use playsession::config::SessionConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => SessionConfig::load_from(path).with_env_overrides(),
        None => SessionConfig::load(),
    };
    init_tracing(&config.log_filter);

    let exit_code = run_cli(cli, config).await;
    std::process::exit(exit_code.into());
}

/// Install the stderr fmt subscriber; RUST_LOG wins over the configured filter
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli, config: SessionConfig) -> ExitCode {
    let output = Output::new(&cli);

    match cli.command {
        Command::Simulate(cmd) => commands::simulate_cmd(cmd, config, &output).await,

        Command::CastPayload(cmd) => commands::cast_payload_cmd(cmd, &config, &output),

        Command::Config(cmd) => commands::config_cmd(cmd, &config, cli.config.clone(), &output),
    }
}
