use super::Change;
use crate::commands::{run_checked, Cmd, CommandRunner};
use std::path::Path;
use tikvpn_core::{fsutil, AppError};

const IP_FORWARD: &str = "net.ipv4.ip_forward";
const DROPIN: &str = "# Managed by tikvpn\nnet.ipv4.ip_forward = 1\n";

/// Enable IPv4 forwarding, persisted in a sysctl.d drop-in and at runtime.
pub async fn apply(runner: &dyn CommandRunner, dropin: &Path) -> Result<Change, AppError> {
    let mut changed = fsutil::write_if_changed(dropin, DROPIN.as_bytes(), 0o644)?;

    if runtime_value(runner).await? != "1" {
        run_checked(runner, &Cmd::new("sysctl").args(["-w", "net.ipv4.ip_forward=1"])).await?;
        changed = true;
    }
    Ok(Change::from_changed(changed))
}

pub async fn runtime_value(runner: &dyn CommandRunner) -> Result<String, AppError> {
    let out = run_checked(runner, &Cmd::new("sysctl").args(["-n", IP_FORWARD])).await?;
    Ok(out.trim().to_string())
}
