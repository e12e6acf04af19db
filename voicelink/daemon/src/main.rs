//! Voicelink Daemon - Host Link for the Voice Protocol Engine
//!
//! Runs a voicelink engine against the cloud voice service over WebSocket,
//! using the simulated device as collaborator bundle. Useful for exercising
//! a service deployment without hardware on the bench.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config file, then environment)
//! voicelink-daemon
//!
//! # Point at another service
//! voicelink-daemon --url wss://voice.example.com/device
//!
//! # With config file
//! voicelink-daemon --config /etc/voicelink/voicelink.toml
//!
//! # Verbose logging
//! RUST_LOG=debug voicelink-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod link;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use voicelink_core::{
    default_config_path, load_config_from_path, ConfigOverrides, FallbackClips, SimulatedDevice,
    VoicelinkConfig,
};

use link::Link;

/// Voicelink Daemon - WebSocket host for the voice protocol engine
#[derive(Parser, Debug)]
#[command(name = "voicelink-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// WebSocket URL of the voice service
    #[arg(short = 'u', long, env = "VOICELINK_URL", value_name = "URL")]
    url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "VOICELINK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen mode: never resume listening after a reply
    #[arg(long)]
    listen_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "VOICELINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "voicelink_daemon={level},voicelink_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Load the configuration file and fold command-line flags over it
fn resolve_config(args: &Args) -> Result<VoicelinkConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.url {
        overrides = overrides.with_url(url.clone());
    }
    if args.listen_mode {
        overrides = overrides.with_listen_mode(true);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;

    Ok(config)
}

/// Flip the shutdown flag on SIGTERM or SIGINT
async fn wait_for_signal(shutdown: watch::Sender<bool>) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install signal handlers, only a kill will stop the daemon");
            // Keep the sender alive so the link does not read a dropped channel as shutdown
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }
    let _ = shutdown.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Voicelink daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        url = %config.link.url,
        source = %config.source(),
        listen_mode = config.engine.listen_mode,
        "Configuration loaded"
    );
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let fallback = FallbackClips::load(&config.fallback).context("Failed to load fallback clips")?;
    info!(clips = fallback.len(), "Fallback clips loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));

    let link = Link::new(config, fallback, SimulatedDevice::new());
    let result = link.run(shutdown_rx).await;

    info!("Shutting down...");

    match result {
        Ok(()) => {
            info!("Voicelink daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "voicelink-daemon",
            "--url",
            "ws://10.0.0.5:9000",
            "--listen-mode",
            "-l",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.url.as_deref(), Some("ws://10.0.0.5:9000"));
        assert!(args.listen_mode);
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nurl = \"ws://file.example:1\"").unwrap();

        let args = Args::try_parse_from([
            "voicelink-daemon",
            "--config",
            file.path().to_str().unwrap(),
            "--url",
            "wss://cli.example/device",
            "--listen-mode",
        ])
        .unwrap();

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.link.url, "wss://cli.example/device");
        assert!(config.engine.listen_mode);
    }

    #[test]
    fn test_bad_url_override_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let args = Args::try_parse_from([
            "voicelink-daemon",
            "--config",
            file.path().to_str().unwrap(),
            "--url",
            "http://not-a-socket",
        ])
        .unwrap();

        assert!(resolve_config(&args).is_err());
    }
}
