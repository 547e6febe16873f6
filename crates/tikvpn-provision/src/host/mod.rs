//! Host state: ip forwarding, firewall, systemd override.
//!
//! Each sub-step is idempotent and runs regardless of whether the others
//! failed; the caller gets one outcome per step.

mod firewall;
mod sysctl;
mod unit;

pub use firewall::{apply as apply_firewall, inspect as inspect_firewall, FirewallStatus};
pub use sysctl::{apply as apply_ip_forwarding, runtime_value as ip_forward_runtime};
pub use unit::{apply as apply_override, render_override};

use crate::commands::CommandRunner;
use std::fmt;
use tikvpn_core::{AppError, Layout, ProvisionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStep {
    IpForwarding,
    Firewall,
    ServiceOverride,
}

impl HostStep {
    pub fn label(&self) -> &'static str {
        match self {
            HostStep::IpForwarding => "ip forwarding",
            HostStep::Firewall => "firewall",
            HostStep::ServiceOverride => "service override",
        }
    }

    /// Command that shows the state this step manages.
    pub fn hint(&self, layout: &Layout) -> String {
        match self {
            HostStep::IpForwarding => "sysctl net.ipv4.ip_forward".into(),
            HostStep::Firewall => "firewall-cmd --list-all".into(),
            HostStep::ServiceOverride => format!("systemctl cat {}", layout.service_unit()),
        }
    }
}

impl fmt::Display for HostStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Applied,
    AlreadyInPlace,
}

impl Change {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Change::Applied
        } else {
            Change::AlreadyInPlace
        }
    }
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: HostStep,
    pub hint: String,
    pub result: Result<Change, AppError>,
}

#[derive(Debug, Default)]
pub struct HostReport {
    pub outcomes: Vec<StepOutcome>,
}

impl HostReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// The first step that failed, in execution order.
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.result.is_err())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = HostStep> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.step)
    }

    /// One line per failed step, naming the command to inspect it with.
    pub fn warnings(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Err(e) => Some(format!("{} not applied: {e} (check `{}`)", o.step, o.hint)),
                Ok(_) => None,
            })
            .collect()
    }
}

/// Run all three sub-steps and collect their outcomes.
pub async fn apply_all(runner: &dyn CommandRunner, config: &ProvisionConfig) -> HostReport {
    let mut report = HostReport::default();

    let steps = [
        HostStep::IpForwarding,
        HostStep::Firewall,
        HostStep::ServiceOverride,
    ];
    for step in steps {
        let result = match step {
            HostStep::IpForwarding => sysctl::apply(runner, &config.layout.sysctl_conf).await,
            HostStep::Firewall => firewall::apply(runner, &config.params).await,
            HostStep::ServiceOverride => unit::apply(runner, &config.layout).await,
        }
        .map_err(|e| AppError::HostMutation {
            step: step.label().to_string(),
            message: e.to_string(),
        });

        match &result {
            Ok(change) => tracing::info!(step = %step, ?change, "host step done"),
            Err(e) => tracing::warn!(step = %step, error = %e, "host step failed"),
        }
        report.outcomes.push(StepOutcome {
            step,
            hint: step.hint(&config.layout),
            result,
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn config(root: &std::path::Path) -> ProvisionConfig {
        ProvisionConfig {
            layout: Layout::under(root),
            ..ProvisionConfig::default()
        }
    }

    #[tokio::test]
    async fn all_steps_apply_then_converge() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let cfg = config(tmp.path());

        let first = apply_all(&host, &cfg).await;
        assert!(first.is_clean());
        assert!(first
            .outcomes
            .iter()
            .all(|o| matches!(o.result, Ok(Change::Applied))));

        let second = apply_all(&host, &cfg).await;
        assert!(second
            .outcomes
            .iter()
            .all(|o| matches!(o.result, Ok(Change::AlreadyInPlace))));
        assert_eq!(host.port_rules("1194/udp"), 1);
    }

    #[tokio::test]
    async fn firewall_failure_does_not_stop_other_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.with_state(|s| s.fail_programs.insert("firewall-cmd".into()));
        let cfg = config(tmp.path());

        let report = apply_all(&host, &cfg).await;
        assert!(!report.is_clean());
        assert_eq!(report.first_failure().unwrap().step, HostStep::Firewall);
        assert_eq!(
            report.succeeded().collect::<Vec<_>>(),
            [HostStep::IpForwarding, HostStep::ServiceOverride]
        );
        assert!(cfg.layout.override_conf().exists());

        let warnings = report.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("firewall-cmd --list-all"));
    }

    #[tokio::test]
    async fn override_hint_names_the_configured_unit() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.with_state(|s| s.fail_programs.insert("systemctl".into()));
        let mut cfg = config(tmp.path());
        cfg.layout.server_conf = tmp.path().join("etc/openvpn/server/office.conf");

        let report = apply_all(&host, &cfg).await;
        assert!(!report.is_clean());
        assert!(report
            .warnings()
            .iter()
            .any(|w| w.contains("systemctl cat openvpn-server@office.service")));
    }
}
