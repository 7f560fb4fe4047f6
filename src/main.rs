//! CLI entrypoint: `run` boots the supervisor and blocks until SIGINT or
//! SIGTERM; `createaccount` is the ancillary keystore-creation command
//! (spec §6). Grounded in `engine/src/main.rs`'s `clap::Parser` + tracing
//! init pattern.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use header_relay::{settings::Settings, supervisor::Supervisor, wallet};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "header-relay", about = "Cross-chain header-synchronization relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read config + roles, start the supervisor, block until shutdown.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, env = "RELAYER_ROLES", default_value = "roles.json")]
        roles: PathBuf,
    },
    /// Create a new wallet keystore file.
    Createaccount {
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "")]
        pass: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, roles } => run(config, roles).await,
        Command::Createaccount { path, pass } => {
            wallet::create_account(&path, &pass)?;
            Ok(())
        }
    }
}

async fn run(config: PathBuf, roles: PathBuf) -> anyhow::Result<()> {
    let mut settings = Settings::load(&config)?;
    settings.load_roles(&roles)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    Supervisor::new(settings).run(cancel).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
