//! relaygridd — the relaygrid daemon.
//!
//! # Usage
//!
//! ```text
//! relaygridd run --config /etc/relaygrid/relaygridd.toml --port 3000
//! relaygridd run --asr /etc/relaygrid/asr.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use relaygridd::config::AutoscaleConfig;
use relaygridd::{Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "relaygridd", about = "relaygrid load balancer and fleet orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run the pool, task, and autoscale loops.
    Run {
        /// Daemon config file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides the config file.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory. Overrides the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Autoscale provider JSON. Enables autoscaling.
        #[arg(long)]
        asr: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaygridd=debug,relaygrid=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            asr,
        } => {
            let mut daemon_config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                daemon_config.port = port;
            }
            if let Some(data_dir) = data_dir {
                daemon_config.data_dir = data_dir;
            }
            if let Some(asr) = asr {
                match daemon_config.autoscale.as_mut() {
                    Some(autoscale) => autoscale.config = asr,
                    None => daemon_config.autoscale = Some(AutoscaleConfig::new(asr)),
                }
            }
            run(daemon_config).await
        }
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("relaygrid daemon starting");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let daemon = Daemon::build(config).await?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    daemon
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
