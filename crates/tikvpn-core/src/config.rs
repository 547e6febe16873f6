use crate::error::AppError;
use crate::fsutil;
use crate::types::{
    AuthDigest, BundleMode, Cipher, Network, PeerProfile, Protocol, ServerParams,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1194;
pub const DEFAULT_NETWORK: Network = Network {
    addr: Ipv4Addr::new(10, 8, 0, 0),
    prefix: 24,
};
pub const DEFAULT_CLIENT_NAME: &str = "mikrotik";
pub const SERVER_NAME: &str = "server";
pub const CA_COMMON_NAME: &str = "tikvpn CA";
pub const DEFAULT_DH_BITS: u32 = 2048;
pub const KEEPALIVE_INTERVAL: u32 = 10;
pub const KEEPALIVE_TIMEOUT: u32 = 120;
pub const SERVICE_TIMEOUT_SECS: u64 = 30;
pub const SERVICE_POLL_MS: u64 = 1000;

pub const OPENVPN_BIN: &str = "/usr/sbin/openvpn";
pub const EASYRSA_BIN: &str = "/usr/share/easy-rsa/3/easyrsa";
pub const ADDRESS_PLACEHOLDER: &str = "<SERVER_PUBLIC_IP>";

/// Filesystem locations touched by provisioning.
///
/// `Layout::system()` is the real host layout; `Layout::under(root)` puts
/// every path beneath `root` so whole runs can happen in a scratch dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub pki_dir: PathBuf,
    pub server_conf: PathBuf,
    pub sysctl_conf: PathBuf,
    pub systemd_dir: PathBuf,
    pub bundle_root: PathBuf,
    pub state_dir: PathBuf,
    pub easyrsa_bin: PathBuf,
}

impl Layout {
    pub fn system() -> Self {
        let mut layout = Self::under(Path::new("/"));
        // HOME of the running account; EL sudo resets it to /root
        if let Some(home) = dirs::home_dir() {
            layout.bundle_root = home.join("tikvpn-clients");
        }
        layout
    }

    pub fn under(root: &Path) -> Self {
        Self {
            pki_dir: root.join("etc/openvpn/easy-rsa/pki"),
            server_conf: root.join(format!("etc/openvpn/server/{SERVER_NAME}.conf")),
            sysctl_conf: root.join("etc/sysctl.d/99-tikvpn.conf"),
            systemd_dir: root.join("etc/systemd/system"),
            bundle_root: root.join("root/tikvpn-clients"),
            state_dir: root.join("var/lib/tikvpn"),
            easyrsa_bin: PathBuf::from(EASYRSA_BIN),
        }
    }

    /// systemd instance for the rendered config, e.g. `openvpn-server@server.service`.
    pub fn service_unit(&self) -> String {
        let instance = self
            .server_conf
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(SERVER_NAME);
        format!("openvpn-server@{instance}.service")
    }

    pub fn override_conf(&self) -> PathBuf {
        self.systemd_dir
            .join(format!("{}.d", self.service_unit()))
            .join("override.conf")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    pub fn report_path(&self, client: &str) -> PathBuf {
        self.state_dir.join(format!("connection-{client}.txt"))
    }

    pub fn bundle_dir(&self, client: &str) -> PathBuf {
        self.bundle_root.join(client)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::system()
    }
}

/// Everything a provisioning run needs, threaded through every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub params: ServerParams,
    pub server_name: String,
    pub client_name: String,
    pub ca_common_name: String,
    pub force_ca: bool,
    pub dh_bits: u32,
    pub bundle_mode: BundleMode,
    pub service_timeout: Duration,
    pub service_poll: Duration,
    pub layout: Layout,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            params: ServerParams {
                port: DEFAULT_PORT,
                proto: Protocol::Udp,
                dev: "tun".into(),
                cipher: Cipher::Aes256Cbc,
                auth: AuthDigest::Sha256,
                network: DEFAULT_NETWORK,
                keepalive_interval: KEEPALIVE_INTERVAL,
                keepalive_timeout: KEEPALIVE_TIMEOUT,
                peer: PeerProfile::RouterOs7,
            },
            server_name: SERVER_NAME.into(),
            client_name: DEFAULT_CLIENT_NAME.into(),
            ca_common_name: CA_COMMON_NAME.into(),
            force_ca: false,
            dh_bits: DEFAULT_DH_BITS,
            bundle_mode: BundleMode::Create,
            service_timeout: Duration::from_secs(SERVICE_TIMEOUT_SECS),
            service_poll: Duration::from_millis(SERVICE_POLL_MS),
            layout: Layout::system(),
        }
    }
}

/// Audit record of one completed run, saved under `<state_dir>/runs/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub client_name: String,
    pub address: String,
    pub address_source: Option<String>,
    pub port: u16,
    pub proto: Protocol,
    pub cipher: Cipher,
    pub auth: AuthDigest,
    pub network: Network,
    pub bundle_dir: Option<PathBuf>,
    pub report_path: PathBuf,
    pub ca_fingerprint: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn is_incomplete(&self) -> bool {
        self.address_source.is_none()
    }

    pub fn save(&self, layout: &Layout) -> Result<PathBuf, AppError> {
        let path = layout.runs_dir().join(format!("{}.json", self.id));
        let json = serde_json::to_string_pretty(self)?;
        fsutil::write_atomic(&path, json.as_bytes(), 0o600)?;
        Ok(path)
    }

    /// Newest record under `<state_dir>/runs/`, if any run has completed.
    pub fn latest(layout: &Layout) -> Result<Option<Self>, AppError> {
        let dir = layout.runs_dir();
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut latest: Option<Self> = None;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: Self = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            if latest
                .as_ref()
                .map_or(true, |l| record.created_at > l.created_at)
            {
                latest = Some(record);
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_name_follows_config_stem() {
        let layout = Layout::under(Path::new("/tmp/x"));
        assert_eq!(layout.service_unit(), "openvpn-server@server.service");
        assert!(layout
            .override_conf()
            .ends_with("etc/systemd/system/openvpn-server@server.service.d/override.conf"));
    }

    #[test]
    fn system_bundles_live_in_home() {
        let layout = Layout::system();
        assert!(layout.bundle_root.ends_with("tikvpn-clients"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(layout.bundle_root, home.join("tikvpn-clients"));
        }
        assert_eq!(layout.pki_dir, Path::new("/etc/openvpn/easy-rsa/pki"));
    }

    #[test]
    fn defaults_match_routeros_profile() {
        let cfg = ProvisionConfig::default();
        assert_eq!(cfg.params.port_spec(), "1194/udp");
        assert_eq!(cfg.params.cipher, Cipher::Aes256Cbc);
        assert_eq!(cfg.params.auth, AuthDigest::Sha256);
        assert_eq!(cfg.params.network.to_string(), "10.8.0.0/24");
    }

    fn record(layout: &Layout, id: &str) -> RunRecord {
        RunRecord {
            id: id.into(),
            client_name: "mikrotik".into(),
            address: ADDRESS_PLACEHOLDER.into(),
            address_source: None,
            port: 1194,
            proto: Protocol::Udp,
            cipher: Cipher::Aes256Cbc,
            auth: AuthDigest::Sha256,
            network: DEFAULT_NETWORK,
            bundle_dir: None,
            report_path: layout.report_path("mikrotik"),
            ca_fingerprint: None,
            warnings: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn run_record_saves_as_json() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::under(tmp.path());
        let record = record(&layout, "abc");
        let path = record.save(&layout).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"cipher\": \"AES-256-CBC\""));
        assert!(record.is_incomplete());
    }

    #[test]
    fn latest_picks_newest_record() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::under(tmp.path());
        assert!(RunRecord::latest(&layout).unwrap().is_none());

        let mut old = record(&layout, "old");
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        old.save(&layout).unwrap();
        record(&layout, "new").save(&layout).unwrap();

        assert_eq!(RunRecord::latest(&layout).unwrap().unwrap().id, "new");
    }
}
