use std::collections::HashMap;
use tikvpn_core::AppError;

/// Distributions the provisioning flow is tested on.
const EL_IDS: &[&str] = &["rhel", "centos", "rocky", "almalinux", "ol"];
const MIN_EL_MAJOR: u32 = 8;

/// Raw facts about the host, gathered once by the caller.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub euid: u32,
    pub os_release: String,
}

impl HostFacts {
    /// Read the effective uid and `/etc/os-release` of this machine.
    #[cfg(unix)]
    pub fn gather() -> Result<Self, AppError> {
        let status = std::fs::read_to_string("/proc/self/status")
            .map_err(|e| AppError::UnsupportedHost(format!("cannot read /proc/self/status: {e}")))?;
        let euid = effective_uid(&status).ok_or_else(|| {
            AppError::UnsupportedHost("no Uid line in /proc/self/status".into())
        })?;
        let os_release = std::fs::read_to_string("/etc/os-release")
            .or_else(|_| std::fs::read_to_string("/usr/lib/os-release"))
            .map_err(|e| AppError::UnsupportedHost(format!("cannot read os-release: {e}")))?;
        Ok(Self { euid, os_release })
    }

    #[cfg(not(unix))]
    pub fn gather() -> Result<Self, AppError> {
        Err(AppError::UnsupportedHost("only Linux hosts are supported".into()))
    }
}

/// Effective uid from a `/proc/<pid>/status` body. The `Uid:` line lists
/// real, effective, saved and filesystem uids in that order.
pub fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFamily {
    /// RHEL and rebuilds; packages come from EPEL.
    EnterpriseLinux { major: u32 },
    Fedora,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub id: String,
    pub pretty_name: String,
    pub family: HostFamily,
}

/// Verify privilege and OS family. Pure: never touches the host.
pub fn check(facts: &HostFacts) -> Result<HostInfo, AppError> {
    if facts.euid != 0 {
        return Err(AppError::InsufficientPrivilege { euid: facts.euid });
    }
    detect_host(&facts.os_release)
}

pub fn detect_host(os_release: &str) -> Result<HostInfo, AppError> {
    let fields = parse_os_release(os_release);
    let id = fields.get("ID").cloned().unwrap_or_default();
    let like = fields.get("ID_LIKE").cloned().unwrap_or_default();
    let version = fields.get("VERSION_ID").cloned().unwrap_or_default();
    let pretty_name = fields
        .get("PRETTY_NAME")
        .cloned()
        .unwrap_or_else(|| format!("{id} {version}"));

    let family = if id == "fedora" {
        HostFamily::Fedora
    } else if EL_IDS.contains(&id.as_str())
        || like.split_whitespace().any(|l| l == "rhel" || l == "centos")
    {
        let major = version
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok())
            .ok_or_else(|| {
                AppError::UnsupportedHost(format!("{pretty_name}: unreadable VERSION_ID"))
            })?;
        if major < MIN_EL_MAJOR {
            return Err(AppError::UnsupportedHost(format!(
                "{pretty_name}: EL{major} is too old (need EL{MIN_EL_MAJOR} or newer)"
            )));
        }
        HostFamily::EnterpriseLinux { major }
    } else if like.split_whitespace().any(|l| l == "fedora") {
        HostFamily::Fedora
    } else {
        return Err(AppError::UnsupportedHost(format!(
            "{pretty_name} is not a RHEL-family distribution"
        )));
    };

    Ok(HostInfo {
        id,
        pretty_name,
        family,
    })
}

fn parse_os_release(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROCKY9: &str = r#"NAME="Rocky Linux"
VERSION="9.4 (Blue Onyx)"
ID="rocky"
ID_LIKE="rhel centos fedora"
VERSION_ID="9.4"
PRETTY_NAME="Rocky Linux 9.4 (Blue Onyx)"
"#;

    #[test]
    fn effective_uid_is_second_uid_column() {
        let status = "Name:\ttikvpn\nUmask:\t0022\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(effective_uid(status), Some(0));
        assert_eq!(effective_uid("Name:\ttikvpn\n"), None);
    }

    #[test]
    fn root_on_rocky_passes() {
        let info = check(&HostFacts {
            euid: 0,
            os_release: ROCKY9.into(),
        })
        .unwrap();
        assert_eq!(info.family, HostFamily::EnterpriseLinux { major: 9 });
        assert_eq!(info.pretty_name, "Rocky Linux 9.4 (Blue Onyx)");
    }

    #[test]
    fn non_root_is_rejected_before_os_check() {
        let err = check(&HostFacts {
            euid: 1000,
            os_release: "ID=debian\n".into(),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPrivilege { euid: 1000 }));
    }

    #[test]
    fn debian_and_el7_are_unsupported() {
        let debian = "ID=debian\nVERSION_ID=\"12\"\nPRETTY_NAME=\"Debian GNU/Linux 12\"\n";
        assert!(matches!(
            detect_host(debian),
            Err(AppError::UnsupportedHost(_))
        ));

        let centos7 = "ID=\"centos\"\nID_LIKE=\"rhel fedora\"\nVERSION_ID=\"7\"\n";
        let err = detect_host(centos7).unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn fedora_and_derivatives_detected() {
        assert_eq!(
            detect_host("ID=fedora\nVERSION_ID=40\n").unwrap().family,
            HostFamily::Fedora
        );
        let alma = "ID=\"almalinux\"\nVERSION_ID=\"8.10\"\n";
        assert_eq!(
            detect_host(alma).unwrap().family,
            HostFamily::EnterpriseLinux { major: 8 }
        );
    }
}
