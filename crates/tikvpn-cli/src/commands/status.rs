use anyhow::{Context, Result};
use console::style;
use tikvpn_provision::service::ServiceState;
use tikvpn_provision::Pipeline;

use super::ServerArgs;

fn yes_no(ok: bool, yes: &str, no: &str) -> String {
    if ok {
        style(yes).green().to_string()
    } else {
        style(no).red().to_string()
    }
}

/// Print what is currently deployed. Changes nothing.
pub async fn run(args: ServerArgs) -> Result<()> {
    let pipeline = Pipeline::system(args.to_config());
    let status = pipeline
        .status()
        .await
        .context("Failed to inspect the OpenVPN server")?;

    let state = match status.service.state {
        ServiceState::Active => style(status.service.state).green().to_string(),
        ServiceState::Starting => style(status.service.state).yellow().to_string(),
        _ => style(status.service.state).red().to_string(),
    };
    println!(
        "  {:<14}{}  {state} ({})",
        "Service:",
        status.unit,
        if status.service.enabled { "enabled" } else { "disabled" }
    );

    match &status.server {
        Some(conf) => println!(
            "  {:<14}{}/{}  {}  {} / {}",
            "Server:", conf.port, conf.proto, conf.network, conf.cipher, conf.auth
        ),
        None => println!("  {:<14}{}", "Server:", style("not configured").red()),
    }

    if status.firewall.running {
        println!(
            "  {:<14}{} {}, masquerade {}",
            "Firewall:",
            status.port_spec,
            yes_no(status.firewall.port_open, "open", "closed"),
            yes_no(status.firewall.masquerade, "on", "off")
        );
    } else {
        println!("  {:<14}{}", "Firewall:", style("firewalld not running").red());
    }
    println!(
        "  {:<14}{}",
        "IP forward:",
        yes_no(status.ip_forward == "1", "on", "off")
    );
    println!(
        "  {:<14}{}",
        "CA SHA-256:",
        status.ca_fingerprint.as_deref().unwrap_or("N/A")
    );

    println!("\n  Clients ({}):", status.clients.len());
    for client in &status.clients {
        println!("    - {client}");
    }

    if let Some(run) = &status.last_run {
        println!(
            "\n  Last run: {} for '{}' ({}:{}/{})",
            run.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.client_name,
            run.address,
            run.port,
            run.proto
        );
    }
    Ok(())
}
