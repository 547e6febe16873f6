use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Transport protocol of the VPN listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            // OpenVPN accepts tcp-server in server mode; treat it as tcp.
            "tcp" | "tcp-server" => Ok(Protocol::Tcp),
            other => Err(AppError::InvalidParam(format!("unknown protocol '{other}'"))),
        }
    }
}

/// Data channel cipher, spelled the way OpenVPN spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cipher {
    #[serde(rename = "BF-CBC")]
    BfCbc,
    #[serde(rename = "AES-128-CBC")]
    Aes128Cbc,
    #[serde(rename = "AES-192-CBC")]
    Aes192Cbc,
    #[serde(rename = "AES-256-CBC")]
    Aes256Cbc,
    #[serde(rename = "AES-128-GCM")]
    Aes128Gcm,
    #[serde(rename = "AES-192-GCM")]
    Aes192Gcm,
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
}

impl Cipher {
    pub const ALL: [Cipher; 7] = [
        Cipher::BfCbc,
        Cipher::Aes128Cbc,
        Cipher::Aes192Cbc,
        Cipher::Aes256Cbc,
        Cipher::Aes128Gcm,
        Cipher::Aes192Gcm,
        Cipher::Aes256Gcm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cipher::BfCbc => "BF-CBC",
            Cipher::Aes128Cbc => "AES-128-CBC",
            Cipher::Aes192Cbc => "AES-192-CBC",
            Cipher::Aes256Cbc => "AES-256-CBC",
            Cipher::Aes128Gcm => "AES-128-GCM",
            Cipher::Aes192Gcm => "AES-192-GCM",
            Cipher::Aes256Gcm => "AES-256-GCM",
        }
    }

    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            Cipher::Aes128Gcm | Cipher::Aes192Gcm | Cipher::Aes256Gcm
        )
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cipher {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Cipher::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AppError::InvalidParam(format!("unknown cipher '{wanted}'")))
    }
}

/// HMAC digest used for packet authentication (`auth` directive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthDigest {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl AuthDigest {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthDigest::Md5 => "MD5",
            AuthDigest::Sha1 => "SHA1",
            AuthDigest::Sha256 => "SHA256",
            AuthDigest::Sha512 => "SHA512",
        }
    }
}

impl fmt::Display for AuthDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthDigest {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(AuthDigest::Md5),
            "SHA1" => Ok(AuthDigest::Sha1),
            "SHA256" => Ok(AuthDigest::Sha256),
            "SHA512" => Ok(AuthDigest::Sha512),
            other => Err(AppError::InvalidParam(format!("unknown auth digest '{other}'"))),
        }
    }
}

/// The RouterOS release line the exported client will run on.
///
/// RouterOS 6 only speaks OpenVPN over TCP and has no AEAD ciphers;
/// RouterOS 7 adds UDP, GCM and SHA512.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerProfile {
    #[serde(rename = "routeros6")]
    RouterOs6,
    #[serde(rename = "routeros7")]
    RouterOs7,
}

impl PeerProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerProfile::RouterOs6 => "routeros6",
            PeerProfile::RouterOs7 => "routeros7",
        }
    }

    pub fn supports_protocol(&self, proto: Protocol) -> bool {
        match self {
            PeerProfile::RouterOs6 => proto == Protocol::Tcp,
            PeerProfile::RouterOs7 => true,
        }
    }

    pub fn supports_cipher(&self, cipher: Cipher) -> bool {
        match self {
            PeerProfile::RouterOs6 => !cipher.is_aead(),
            PeerProfile::RouterOs7 => true,
        }
    }

    pub fn supports_auth(&self, auth: AuthDigest) -> bool {
        match self {
            PeerProfile::RouterOs6 => auth != AuthDigest::Sha512,
            PeerProfile::RouterOs7 => true,
        }
    }

    /// Cipher name as accepted by `/interface ovpn-client ... cipher=`.
    pub fn routeros_cipher(&self, cipher: Cipher) -> &'static str {
        match (self, cipher) {
            (PeerProfile::RouterOs6, Cipher::BfCbc) => "blowfish128",
            (PeerProfile::RouterOs6, Cipher::Aes128Cbc) => "aes128",
            (PeerProfile::RouterOs6, Cipher::Aes192Cbc) => "aes192",
            (PeerProfile::RouterOs6, _) => "aes256",
            (PeerProfile::RouterOs7, Cipher::BfCbc) => "blowfish128",
            (PeerProfile::RouterOs7, Cipher::Aes128Cbc) => "aes128-cbc",
            (PeerProfile::RouterOs7, Cipher::Aes192Cbc) => "aes192-cbc",
            (PeerProfile::RouterOs7, Cipher::Aes256Cbc) => "aes256-cbc",
            (PeerProfile::RouterOs7, Cipher::Aes128Gcm) => "aes128-gcm",
            (PeerProfile::RouterOs7, Cipher::Aes192Gcm) => "aes192-gcm",
            (PeerProfile::RouterOs7, Cipher::Aes256Gcm) => "aes256-gcm",
        }
    }
}

impl fmt::Display for PeerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerProfile {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "routeros6" | "ros6" | "6" => Ok(PeerProfile::RouterOs6),
            "routeros7" | "ros7" | "7" => Ok(PeerProfile::RouterOs7),
            other => Err(AppError::InvalidParam(format!("unknown peer profile '{other}'"))),
        }
    }
}

/// IPv4 network in CIDR form, e.g. `10.8.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Network {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, AppError> {
        if prefix > 32 {
            return Err(AppError::InvalidParam(format!("prefix /{prefix} is out of range")));
        }
        Ok(Self { addr, prefix })
    }

    /// Build from a network address and a dotted netmask (`server` directive form).
    pub fn from_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, AppError> {
        let bits = u32::from(mask);
        if bits.leading_ones() + bits.trailing_zeros() != 32 {
            return Err(AppError::InvalidParam(format!("{mask} is not a contiguous netmask")));
        }
        Self::new(addr, bits.leading_ones() as u8)
    }

    pub fn mask(&self) -> Ipv4Addr {
        let bits = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        };
        Ipv4Addr::from(bits)
    }

    /// True when `addr` has no host bits set.
    pub fn is_network_address(&self) -> bool {
        u32::from(self.addr) & !u32::from(self.mask()) == 0
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Network {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| AppError::InvalidParam(format!("'{s}' is not in CIDR form")))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| AppError::InvalidParam(format!("bad network address '{addr}': {e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| AppError::InvalidParam(format!("bad prefix '{prefix}': {e}")))?;
        Network::new(addr, prefix)
    }
}

/// Everything the rendered server configuration binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParams {
    pub port: u16,
    pub proto: Protocol,
    pub dev: String,
    pub cipher: Cipher,
    pub auth: AuthDigest,
    pub network: Network,
    pub keepalive_interval: u32,
    pub keepalive_timeout: u32,
    pub peer: PeerProfile,
}

impl ServerParams {
    /// `1194/udp`, the form firewalld uses for port rules.
    pub fn port_spec(&self) -> String {
        format!("{}/{}", self.port, self.proto)
    }
}

/// Which side of the tunnel a certificate authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertRole {
    Server,
    Client,
}

impl CertRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertRole::Server => "server",
            CertRole::Client => "client",
        }
    }
}

impl fmt::Display for CertRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a client bundle directory already holds files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleMode {
    Create,
    Overwrite,
    KeepExisting,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Preflight,
    Dependencies,
    Pki,
    Render,
    HostState,
    Service,
    Bundle,
    Report,
}

impl Stage {
    pub const COUNT: usize = 8;

    pub fn number(&self) -> usize {
        match self {
            Stage::Preflight => 1,
            Stage::Dependencies => 2,
            Stage::Pki => 3,
            Stage::Render => 4,
            Stage::HostState => 5,
            Stage::Service => 6,
            Stage::Bundle => 7,
            Stage::Report => 8,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Dependencies => "dependency install",
            Stage::Pki => "PKI",
            Stage::Render => "config render",
            Stage::HostState => "host state",
            Stage::Service => "service start",
            Stage::Bundle => "client bundle export",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
