//! pipelet binary: parse configuration, run the supervisor until interrupted.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pipelet::{BridgeConfig, Cli, Supervisor};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = BridgeConfig::from_cli(cli).context("invalid configuration")?;

    let mut supervisor = Supervisor::new(config);

    tokio::select! {
        // The supervisor loop is infinite; only the interrupt arm completes
        // in normal operation.
        () = supervisor.run() => {
            tracing::error!("Supervisor loop exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt")?;
            tracing::info!("Interrupt received, shutting down");
        }
    }

    Ok(())
}
