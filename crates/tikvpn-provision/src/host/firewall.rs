use super::Change;
use crate::commands::{run_checked, run_query, Cmd, CommandRunner};
use tikvpn_core::{AppError, ServerParams};

fn firewall_cmd() -> Cmd {
    Cmd::new("firewall-cmd")
}

async fn ensure_running(runner: &dyn CommandRunner) -> Result<(), AppError> {
    let state = runner.exec(&firewall_cmd().arg("--state")).await?;
    if state.success() {
        return Ok(());
    }
    tracing::info!("firewalld not running, enabling it");
    run_checked(runner, &Cmd::new("systemctl").args(["enable", "--now", "firewalld"])).await?;
    Ok(())
}

/// Open `<port>/<proto>` and enable masquerade in the permanent config.
///
/// Queries before adding so a re-run never appends a second rule, and only
/// reloads when something was added.
pub async fn apply(runner: &dyn CommandRunner, params: &ServerParams) -> Result<Change, AppError> {
    ensure_running(runner).await?;
    let spec = params.port_spec();
    let mut changed = false;

    let has_port = run_query(
        runner,
        &firewall_cmd().args(["--permanent".to_string(), format!("--query-port={spec}")]),
    )
    .await?;
    if !has_port {
        run_checked(
            runner,
            &firewall_cmd().args(["--permanent".to_string(), format!("--add-port={spec}")]),
        )
        .await?;
        changed = true;
    }

    let has_masquerade = run_query(
        runner,
        &firewall_cmd().args(["--permanent", "--query-masquerade"]),
    )
    .await?;
    if !has_masquerade {
        run_checked(runner, &firewall_cmd().args(["--permanent", "--add-masquerade"])).await?;
        changed = true;
    }

    if changed {
        run_checked(runner, &firewall_cmd().arg("--reload")).await?;
    }
    Ok(Change::from_changed(changed))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallStatus {
    pub running: bool,
    pub port_open: bool,
    pub masquerade: bool,
}

/// Read-only view of the rules `apply` manages.
pub async fn inspect(
    runner: &dyn CommandRunner,
    params: &ServerParams,
) -> Result<FirewallStatus, AppError> {
    let running = runner.exec(&firewall_cmd().arg("--state")).await?.success();
    if !running {
        return Ok(FirewallStatus {
            running,
            port_open: false,
            masquerade: false,
        });
    }
    let port_open = run_query(
        runner,
        &firewall_cmd().args([
            "--permanent".to_string(),
            format!("--query-port={}", params.port_spec()),
        ]),
    )
    .await?;
    let masquerade = run_query(
        runner,
        &firewall_cmd().args(["--permanent", "--query-masquerade"]),
    )
    .await?;
    Ok(FirewallStatus {
        running,
        port_open,
        masquerade,
    })
}
