//! ShellBridge daemon entry point.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bridge::config::{default_config_path, Config};
use bridge::server::BridgeServer;

/// Extra time allowed on shutdown for sessions to finish their
/// grace-period teardown before the process exits anyway.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "shellbridge",
    about = "WebSocket bridge to local interactive shells",
    version
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    init_logging(&config, cli.verbose)?;

    config.validate()?;

    tracing::info!(
        config = %config_path.display(),
        listen = %config.server.listen,
        shell = %config.session.shell,
        "Starting shellbridge"
    );

    let server = BridgeServer::bind(config.clone()).await?;
    let registry = server.registry();

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    // Stop accepting, then cancel every live session and give each one
    // its grace period to reap the shell and deregister.
    shutdown.cancel();
    let _ = server_task.await;

    let cancelled = registry.shutdown_all();
    if cancelled > 0 {
        let drained = registry
            .wait_idle(config.grace_period() + SHUTDOWN_MARGIN)
            .await;
        if !drained {
            tracing::warn!(
                remaining = registry.count(),
                "Sessions still active at shutdown deadline"
            );
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over both the CLI flag and the
/// configured level.
fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shellbridge={0},bridge={0}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["shellbridge"]);
        assert!(cli.config.is_none());
        assert!(cli.listen.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "shellbridge",
            "--config",
            "/tmp/sb.toml",
            "--listen",
            "0.0.0.0:4000",
            "--verbose",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/sb.toml")));
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:4000"));
        assert!(cli.verbose);
    }
}
