use crate::bundle::ClientBundle;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tikvpn_core::config::ADDRESS_PLACEHOLDER;
use tikvpn_core::{fsutil, AppError, PeerProfile, ServerParams};
use tokio::net::UdpSocket;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const LOOKUP_URLS: &[&str] = &["https://api.ipify.org", "https://ifconfig.me/ip"];

/// One way of finding the address clients should connect to.
#[async_trait]
pub trait AddressSource: Send + Sync {
    fn name(&self) -> String;
    async fn resolve(&self) -> Result<IpAddr, AppError>;
}

/// Plain-text "what is my IP" service.
pub struct HttpLookup {
    url: String,
    client: reqwest::Client,
}

impl HttpLookup {
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .user_agent(concat!("tikvpn/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AddressSource for HttpLookup {
    fn name(&self) -> String {
        self.url.clone()
    }

    async fn resolve(&self) -> Result<IpAddr, AppError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        body.trim()
            .parse()
            .map_err(|e| AppError::AddressResolution(format!("{}: '{}': {e}", self.url, body.trim())))
    }
}

/// Source address the kernel would use for the default route. Connecting a
/// UDP socket sends nothing.
pub struct LocalInterface;

#[async_trait]
impl AddressSource for LocalInterface {
    fn name(&self) -> String {
        "local interface".into()
    }

    async fn resolve(&self) -> Result<IpAddr, AppError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("1.1.1.1:53").await?;
        let ip = socket.local_addr()?.ip();
        if ip.is_unspecified() || ip.is_loopback() {
            return Err(AppError::AddressResolution(format!(
                "no usable local address ({ip})"
            )));
        }
        Ok(ip)
    }
}

/// External lookup A, then B, then the local interface.
pub fn default_sources() -> Vec<Box<dyn AddressSource>> {
    let mut sources: Vec<Box<dyn AddressSource>> = Vec::new();
    for url in LOOKUP_URLS {
        match HttpLookup::new(*url) {
            Ok(lookup) => sources.push(Box::new(lookup)),
            Err(e) => tracing::warn!(url, error = %e, "skipping address lookup"),
        }
    }
    sources.push(Box::new(LocalInterface));
    sources
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// The address, or `ADDRESS_PLACEHOLDER` if nothing worked.
    pub value: String,
    /// Which source produced `value`; `None` when it is the placeholder.
    pub source: Option<String>,
    pub failures: Vec<(String, String)>,
}

impl ResolvedAddress {
    pub fn is_incomplete(&self) -> bool {
        self.source.is_none()
    }
}

/// Try each source in order; the first success wins. Never fails: with no
/// answer the placeholder is returned and the result is marked incomplete.
pub async fn resolve_external(sources: &[Box<dyn AddressSource>]) -> ResolvedAddress {
    let mut failures = Vec::new();
    for source in sources {
        match source.resolve().await {
            Ok(ip) => {
                tracing::info!(source = %source.name(), %ip, "external address resolved");
                return ResolvedAddress {
                    value: ip.to_string(),
                    source: Some(source.name()),
                    failures,
                };
            }
            Err(e) => {
                tracing::warn!(source = %source.name(), error = %e, "address lookup failed");
                failures.push((source.name(), e.to_string()));
            }
        }
    }
    ResolvedAddress {
        value: ADDRESS_PLACEHOLDER.to_string(),
        source: None,
        failures,
    }
}

/// Everything the final instructions block is built from.
pub struct ConnectionReport<'a> {
    pub params: &'a ServerParams,
    pub address: &'a ResolvedAddress,
    pub bundle: &'a ClientBundle,
    pub ca_fingerprint: Option<&'a str>,
    pub service_unit: &'a str,
}

impl ConnectionReport<'_> {
    pub fn render(&self) -> String {
        let p = self.params;
        let b = self.bundle;
        let addr = &self.address.value;
        let ca = file_name(&b.ca_cert);
        let cert = file_name(&b.cert);
        let key = file_name(&b.key);
        let mut out = String::new();

        let _ = writeln!(out, "  Server address:    {addr}");
        if self.address.is_incomplete() {
            let _ = writeln!(
                out,
                "  WARNING: external address could not be detected. Replace {ADDRESS_PLACEHOLDER} below."
            );
        }
        let _ = writeln!(out, "  Port / protocol:   {}", p.port_spec());
        let _ = writeln!(out, "  Cipher / auth:     {} / {}", p.cipher, p.auth);
        let _ = writeln!(out, "  VPN network:       {} (topology subnet)", p.network);
        let _ = writeln!(out, "  Service unit:      {}", self.service_unit);
        if let Some(fp) = self.ca_fingerprint {
            let _ = writeln!(out, "  CA SHA-256:        {fp}");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "  Client bundle:     {}", b.dir.display());
        let _ = writeln!(out, "    {ca}  {cert}  {key}");
        let _ = writeln!(out);
        let _ = writeln!(out, "  Next steps on the MikroTik router ({}):", p.peer);
        let _ = writeln!(out, "    1. Upload {ca}, {cert} and {key} to Files");
        let _ = writeln!(out, "    2. /certificate import file-name={ca} passphrase=\"\"");
        let _ = writeln!(out, "       /certificate import file-name={cert} passphrase=\"\"");
        let _ = writeln!(out, "       /certificate import file-name={key} passphrase=\"\"");
        let _ = writeln!(out, "    3. {}", self.ovpn_client_command());
        let _ = writeln!(out, "    4. /interface ovpn-client monitor ovpn-{}", b.client);
        out
    }

    fn ovpn_client_command(&self) -> String {
        let p = self.params;
        let mut cmd = format!(
            "/interface ovpn-client add name=ovpn-{client} connect-to={addr} port={port}",
            client = self.bundle.client,
            addr = self.address.value,
            port = p.port,
        );
        // RouterOS 6 has no protocol= argument; it is TCP only.
        if p.peer == PeerProfile::RouterOs7 {
            let _ = write!(cmd, " protocol={}", p.proto);
        }
        let _ = write!(
            cmd,
            " mode=ip user={client} certificate={cert}_0 cipher={cipher} auth={auth} add-default-route=no",
            client = self.bundle.client,
            cert = file_name(&self.bundle.cert),
            cipher = p.peer.routeros_cipher(p.cipher),
            auth = p.auth.as_str().to_ascii_lowercase(),
        );
        cmd
    }
}

/// Write the report, with any warnings appended, to `path`.
pub fn save(path: &Path, body: &str, warnings: &[String]) -> Result<(), AppError> {
    let mut text = body.to_string();
    if !warnings.is_empty() {
        text.push_str("\n  Warnings:\n");
        for warning in warnings {
            let _ = writeln!(text, "    - {warning}");
        }
    }
    fsutil::write_atomic(path, text.as_bytes(), 0o600)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
