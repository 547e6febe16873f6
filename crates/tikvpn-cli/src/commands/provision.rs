use anyhow::{Context, Result};
use tikvpn_provision::{HostFacts, Pipeline};

use super::ServerArgs;

/// Run the full provisioning pipeline and print the connection report.
pub async fn run(args: ServerArgs) -> Result<()> {
    let mut config = args.to_config();
    let facts = HostFacts::gather().context("Failed to inspect the local host")?;
    config.bundle_mode = super::bundle_mode(&config.layout, &config.client_name, args.yes)?;

    tracing::debug!(?config, "provisioning");
    let pipeline = Pipeline::system(config);
    let summary = pipeline.run(&facts).await?;

    tikvpn_ui::print_summary(&summary.record, &summary.report);
    Ok(())
}
