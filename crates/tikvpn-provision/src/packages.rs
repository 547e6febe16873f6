use crate::commands::{run_checked, run_query, Cmd, CommandRunner};
use crate::preflight::HostFamily;
use tikvpn_core::AppError;

const BASE_PACKAGES: &[&str] = &["openvpn", "easy-rsa", "firewalld", "openssl"];
const EPEL: &str = "epel-release";

/// Packages to install for `family`, grouped into batches that must be
/// installed in order (EPEL has to exist before openvpn/easy-rsa resolve).
pub fn required_batches(family: HostFamily) -> Vec<Vec<&'static str>> {
    match family {
        HostFamily::EnterpriseLinux { .. } => vec![vec![EPEL], BASE_PACKAGES.to_vec()],
        HostFamily::Fedora => vec![BASE_PACKAGES.to_vec()],
    }
}

/// Install whatever is missing. Returns the names actually installed;
/// an empty list means the host already had everything.
pub async fn ensure(
    runner: &dyn CommandRunner,
    family: HostFamily,
) -> Result<Vec<String>, AppError> {
    let mut installed = Vec::new();

    for batch in required_batches(family) {
        let mut missing = Vec::new();
        for pkg in batch {
            if !is_installed(runner, pkg).await? {
                missing.push(pkg.to_string());
            }
        }
        if missing.is_empty() {
            continue;
        }

        tracing::info!(packages = ?missing, "installing packages");
        let cmd = Cmd::new("dnf").args(["install", "-y"]).args(missing.iter().cloned());
        run_checked(runner, &cmd)
            .await
            .map_err(|e| AppError::DependencyInstall {
                packages: missing.join(", "),
                message: e.to_string(),
            })?;
        installed.extend(missing);
    }

    Ok(installed)
}

async fn is_installed(runner: &dyn CommandRunner, pkg: &str) -> Result<bool, AppError> {
    run_query(runner, &Cmd::new("rpm").args(["-q", "--quiet", pkg]))
        .await
        .map_err(|e| AppError::DependencyInstall {
            packages: pkg.to_string(),
            message: e.to_string(),
        })
}
