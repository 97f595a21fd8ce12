//! oradb operator binary

use clap::Parser;
use kube::Client;

use oradb_common::telemetry::init_tracing;
use oradb_operator::cli::Cli;
use oradb_operator::controller_runner::build_all;
use oradb_operator::startup::{ensure_crds_installed, render_crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", render_crds()?);
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    if let Err(e) = rustls_provider() {
        tracing::warn!(error = %e, "crypto provider already installed");
    }

    run(cli).await
}

/// Install the aws-lc-rs crypto provider used by every TLS connection
fn rustls_provider() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a process-wide crypto provider was already installed"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.controller_config();
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        concurrency = config.concurrency,
        "Starting oradb controllers:"
    );
    futures::future::join_all(build_all(client, config)).await;

    tracing::info!("oradb operator shut down");
    Ok(())
}
