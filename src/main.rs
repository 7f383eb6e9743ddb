//! cloud-prepare CLI

use clap::Parser;

use cloud_prepare::Cli;
use cloud_prepare_common::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.log_format)?;
    cli.run().await
}
