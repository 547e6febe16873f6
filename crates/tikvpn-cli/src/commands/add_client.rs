use anyhow::{Context, Result};
use tikvpn_provision::{HostFacts, Pipeline};

use super::ServerArgs;

/// Issue a certificate for another router and export its bundle.
pub async fn run(args: ServerArgs, name: String) -> Result<()> {
    let mut config = args.to_config();
    config.client_name = name.clone();
    let facts = HostFacts::gather().context("Failed to inspect the local host")?;
    config.bundle_mode = super::bundle_mode(&config.layout, &name, args.yes)?;

    println!("Adding client '{name}'...");
    let pipeline = Pipeline::system(config);
    let summary = pipeline.add_client(&facts, &name).await?;

    tikvpn_ui::print_summary(&summary.record, &summary.report);
    Ok(())
}
