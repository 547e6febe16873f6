use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tikvpn_core::{
    fsutil, AppError, AuthDigest, Cipher, Network, PeerProfile, Protocol, ServerParams,
};

/// Directives RouterOS cannot negotiate. A rendered config must never
/// contain them.
pub const FORBIDDEN_DIRECTIVES: &[&str] = &["tls-auth", "tls-crypt", "tls-crypt-v2"];

/// Comment recording which RouterOS release the config was rendered for.
const PEER_MARKER: &str = "# tikvpn-peer";

/// Certificate material the server config points at.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub dh: PathBuf,
}

/// Check that the parameter set is consistent and that the target RouterOS
/// release can speak it.
pub fn validate(params: &ServerParams) -> Result<(), AppError> {
    let peer = params.peer;
    if params.port == 0 {
        return Err(AppError::RenderValidation("port must be non-zero".into()));
    }
    if params.dev != "tun" {
        return Err(AppError::RenderValidation(format!(
            "device '{}' is not supported, RouterOS ovpn-client mode=ip needs tun",
            params.dev
        )));
    }
    if !peer.supports_protocol(params.proto) {
        return Err(AppError::RenderValidation(format!(
            "{peer} does not support OpenVPN over {}",
            params.proto
        )));
    }
    if !peer.supports_cipher(params.cipher) {
        return Err(AppError::RenderValidation(format!(
            "{peer} does not support cipher {}",
            params.cipher
        )));
    }
    if !peer.supports_auth(params.auth) {
        return Err(AppError::RenderValidation(format!(
            "{peer} does not support auth {}",
            params.auth
        )));
    }
    let net = params.network;
    if !(8..=30).contains(&net.prefix) {
        return Err(AppError::RenderValidation(format!(
            "network {net} must have a prefix between /8 and /30"
        )));
    }
    if !net.is_network_address() {
        return Err(AppError::RenderValidation(format!(
            "{} has host bits set for /{}",
            net.addr, net.prefix
        )));
    }
    if params.keepalive_interval == 0 || params.keepalive_interval >= params.keepalive_timeout {
        return Err(AppError::RenderValidation(format!(
            "keepalive interval {} must be positive and below timeout {}",
            params.keepalive_interval, params.keepalive_timeout
        )));
    }
    Ok(())
}

/// Render the server configuration. Pure; validates first.
pub fn render(params: &ServerParams, paths: &ServerPaths) -> Result<String, AppError> {
    validate(params)?;

    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };
    line("# Managed by tikvpn. Re-running provisioning overwrites this file.".into());
    line(format!("{PEER_MARKER} {}", params.peer.as_str()));
    line(format!("port {}", params.port));
    line(format!("proto {}", params.proto));
    line(format!("dev {}", params.dev));
    line(format!("ca {}", paths.ca.display()));
    line(format!("cert {}", paths.cert.display()));
    line(format!("key {}", paths.key.display()));
    line(format!("dh {}", paths.dh.display()));
    line("topology subnet".into());
    line(format!(
        "server {} {}",
        params.network.addr,
        params.network.mask()
    ));
    line("ifconfig-pool-persist ipp.txt".into());
    line(format!(
        "keepalive {} {}",
        params.keepalive_interval, params.keepalive_timeout
    ));
    line(format!("cipher {}", params.cipher));
    // OpenVPN 2.5+ only accepts a non-NCP peer if its cipher is listed here.
    line(format!("data-ciphers {}", params.cipher));
    line(format!("data-ciphers-fallback {}", params.cipher));
    line(format!("auth {}", params.auth));
    line("persist-key".into());
    line("persist-tun".into());
    line("user nobody".into());
    line("group nobody".into());
    line("verb 3".into());
    if params.proto == Protocol::Udp {
        line("explicit-exit-notify 1".into());
    }
    Ok(out)
}

/// Render and atomically write to `path`. Overwrites a previous render.
pub fn write(params: &ServerParams, paths: &ServerPaths, path: &Path) -> Result<String, AppError> {
    let text = render(params, paths)?;
    fsutil::write_atomic(path, text.as_bytes(), 0o644)?;
    Ok(text)
}

/// The parameters a rendered configuration binds, as read back from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfig {
    pub port: u16,
    pub proto: Protocol,
    pub dev: String,
    pub cipher: Cipher,
    pub auth: AuthDigest,
    pub topology: String,
    pub network: Network,
    pub keepalive: (u32, u32),
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub dh: PathBuf,
    /// `None` for configs not rendered by tikvpn.
    pub peer: Option<PeerProfile>,
    pub directives: Vec<String>,
}

/// Parse an OpenVPN server config back into the values `render` binds.
pub fn parse(text: &str) -> Result<ParsedConfig, AppError> {
    let mut port = None;
    let mut proto = None;
    let mut dev = None;
    let mut cipher = None;
    let mut auth = None;
    let mut topology = None;
    let mut network = None;
    let mut keepalive = None;
    let (mut ca, mut cert, mut key, mut dh) = (None, None, None, None);
    let mut peer = None;
    let mut directives = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix(PEER_MARKER) {
            peer = Some(rest.parse::<PeerProfile>()?);
            continue;
        }
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(directive) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();
        directives.push(directive.to_string());
        let first = args.first().copied().unwrap_or_default();

        match directive {
            "port" => port = Some(first.parse::<u16>().map_err(|e| bad(line, e))?),
            "proto" => proto = Some(first.parse::<Protocol>()?),
            "dev" => dev = Some(first.to_string()),
            "cipher" => cipher = Some(first.parse::<Cipher>()?),
            "auth" => auth = Some(first.parse::<AuthDigest>()?),
            "topology" => topology = Some(first.to_string()),
            "server" => {
                let [addr, mask] = args.as_slice() else {
                    return Err(bad(line, "expected `server <network> <mask>`"));
                };
                let addr: Ipv4Addr = addr.parse().map_err(|e| bad(line, e))?;
                let mask: Ipv4Addr = mask.parse().map_err(|e| bad(line, e))?;
                network = Some(Network::from_mask(addr, mask)?);
            }
            "keepalive" => {
                let [interval, timeout] = args.as_slice() else {
                    return Err(bad(line, "expected `keepalive <interval> <timeout>`"));
                };
                keepalive = Some((
                    interval.parse::<u32>().map_err(|e| bad(line, e))?,
                    timeout.parse::<u32>().map_err(|e| bad(line, e))?,
                ));
            }
            "ca" => ca = Some(PathBuf::from(first)),
            "cert" => cert = Some(PathBuf::from(first)),
            "key" => key = Some(PathBuf::from(first)),
            "dh" => dh = Some(PathBuf::from(first)),
            _ => {}
        }
    }

    Ok(ParsedConfig {
        port: port.ok_or_else(|| missing("port"))?,
        proto: proto.ok_or_else(|| missing("proto"))?,
        dev: dev.ok_or_else(|| missing("dev"))?,
        cipher: cipher.ok_or_else(|| missing("cipher"))?,
        auth: auth.ok_or_else(|| missing("auth"))?,
        topology: topology.ok_or_else(|| missing("topology"))?,
        network: network.ok_or_else(|| missing("server"))?,
        keepalive: keepalive.ok_or_else(|| missing("keepalive"))?,
        ca: ca.ok_or_else(|| missing("ca"))?,
        cert: cert.ok_or_else(|| missing("cert"))?,
        key: key.ok_or_else(|| missing("key"))?,
        dh: dh.ok_or_else(|| missing("dh"))?,
        peer,
        directives,
    })
}

fn bad(line: &str, err: impl std::fmt::Display) -> AppError {
    AppError::InvalidParam(format!("cannot parse `{line}`: {err}"))
}

fn missing(directive: &str) -> AppError {
    AppError::InvalidParam(format!("config has no `{directive}` directive"))
}
