//! # relay
//!
//! Command-line front end for the connector: `listen` bridges a WebSocket
//! endpoint to stdin/stdout as JSON lines, `translate` maps envelopes offline.

#![deny(unsafe_code)]

mod listen;
mod translate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_settings::RelaySettings;

/// Real-time message relay.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Real-time WebSocket message relay")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding settings. `RUST_LOG` still wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and relay frames between the endpoint and stdin/stdout.
    Listen(listen::ListenArgs),
    /// Translate JSON lines from stdin without connecting.
    Translate(translate::TranslateArgs),
}

fn load_settings(path: Option<&PathBuf>) -> Result<RelaySettings> {
    let settings = match path {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("Failed to load settings")?,
    };
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if cli.json_logs || settings.logging.json {
        relay_core::logging::init_json_subscriber(level);
    } else {
        relay_core::logging::init_subscriber(level);
    }

    match cli.command {
        Command::Listen(args) => listen::run(&settings, args).await,
        Command::Translate(args) => translate::run(&settings, &args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_listen_with_globals() {
        let cli = Cli::try_parse_from([
            "relay",
            "--log-level",
            "debug",
            "listen",
            "--url",
            "ws://localhost:9000",
            "--type",
            "websocket_chat_message_received",
            "--type",
            "connection_established",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.url.as_deref(), Some("ws://localhost:9000"));
        assert_eq!(args.types.len(), 2);
    }

    #[test]
    fn parses_translate_reverse() {
        let cli = Cli::try_parse_from(["relay", "translate", "--reverse", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        let Command::Translate(args) = cli.command else {
            panic!("expected translate");
        };
        assert!(args.reverse);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.connector.id, RelaySettings::default().connector.id);
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings(Some(&path)).is_err());
    }
}
