use super::Change;
use crate::commands::{run_checked, Cmd, CommandRunner};
use tikvpn_core::config::OPENVPN_BIN;
use tikvpn_core::{fsutil, AppError, Layout};

/// Drop-in that replaces the packaged `ExecStart` with one pointing at the
/// rendered config and writing a version 2 status log.
pub fn render_override(layout: &Layout) -> String {
    let conf = layout.server_conf.display();
    let workdir = layout
        .server_conf
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/etc/openvpn/server".into());
    format!(
        "# Managed by tikvpn\n\
         [Service]\n\
         WorkingDirectory={workdir}\n\
         ExecStart=\n\
         ExecStart={OPENVPN_BIN} --status %t/openvpn-server/status-%i.log --status-version 2 --suppress-timestamps --config {conf}\n"
    )
}

/// Install the override and reload systemd if it changed.
pub async fn apply(runner: &dyn CommandRunner, layout: &Layout) -> Result<Change, AppError> {
    let path = layout.override_conf();
    let changed = fsutil::write_if_changed(&path, render_override(layout).as_bytes(), 0o644)?;
    if changed {
        run_checked(runner, &Cmd::new("systemctl").arg("daemon-reload")).await?;
    }
    Ok(Change::from_changed(changed))
}
