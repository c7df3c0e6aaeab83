//! TOLLGATE Helper Daemon - Entry Point
//! File Path: services/helperd/src/main.rs
//! Responsibility: Load configuration, install signal handlers, run the server

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use tollgate_helperd::{FileNetworkSettings, HelperConfig, Server, HELPER_VERSION};
use tollgate_policy::UnixPeerIdentityProvider;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tollgate-helperd: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.helper.log_level)),
        )
        .init();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// First argument overrides the config search path.
fn load_config() -> Result<HelperConfig> {
    match std::env::args_os().nth(1) {
        Some(path) => HelperConfig::load(path),
        None => HelperConfig::load_auto(),
    }
}

fn run(config: HelperConfig) -> Result<()> {
    info!("tollgate-helperd v{} starting", HELPER_VERSION);

    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root - privileged operations may fail");
    }

    let criteria: Vec<&str> = config
        .trust
        .configured_criteria()
        .into_iter()
        .map(|c| c.as_str())
        .collect();
    info!(criteria = ?criteria, "trust requirement loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }

    let backend = FileNetworkSettings::new(&config.helper.state_dir).with_context(|| {
        format!(
            "Failed to create state directory: {}",
            config.helper.state_dir.display()
        )
    })?;

    let server = Server::bind(
        &config.helper.socket_path,
        config.helper.socket_mode,
        config.trust,
        UnixPeerIdentityProvider,
        Arc::new(backend),
    )
    .with_context(|| {
        format!(
            "Failed to bind socket: {}",
            config.helper.socket_path.display()
        )
    })?;

    server.run(&shutdown).context("Server loop failed")?;
    Ok(())
}
