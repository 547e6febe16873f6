pub mod add_client;
pub mod provision;
pub mod status;

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tikvpn_core::config::{self, Layout, ProvisionConfig};
use tikvpn_core::{AuthDigest, BundleMode, Cipher, Network, PeerProfile, Protocol, ServerParams};
use tikvpn_provision::bundle::ClientBundle;

/// Server and client parameters shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port the server listens on
    #[arg(long, global = true, env = "TIKVPN_PORT", default_value_t = config::DEFAULT_PORT)]
    pub port: u16,

    /// Transport protocol (udp or tcp; RouterOS 6 only speaks tcp)
    #[arg(long, global = true, env = "TIKVPN_PROTO", default_value = "udp")]
    pub proto: Protocol,

    /// VPN network in CIDR form
    #[arg(long, global = true, env = "TIKVPN_NETWORK", default_value = "10.8.0.0/24")]
    pub network: Network,

    /// Data channel cipher (e.g. AES-256-CBC, AES-256-GCM)
    #[arg(long, global = true, env = "TIKVPN_CIPHER", default_value = "AES-256-CBC")]
    pub cipher: Cipher,

    /// HMAC digest (SHA1, SHA256, SHA512)
    #[arg(long, global = true, env = "TIKVPN_AUTH", default_value = "SHA256")]
    pub auth: AuthDigest,

    /// RouterOS release of the connecting router (routeros6 or routeros7)
    #[arg(long, global = true, env = "TIKVPN_PEER", default_value = "routeros7")]
    pub peer: PeerProfile,

    /// Client certificate name
    #[arg(long, global = true, env = "TIKVPN_CLIENT", default_value = config::DEFAULT_CLIENT_NAME)]
    pub client: String,

    /// Rebuild the CA even if one exists (invalidates every issued certificate)
    #[arg(long, global = true)]
    pub force_ca: bool,

    /// Diffie-Hellman parameter size in bits
    #[arg(long, global = true, env = "TIKVPN_DH_BITS", default_value_t = config::DEFAULT_DH_BITS)]
    pub dh_bits: u32,

    /// Seconds to wait for the service to become active
    #[arg(long, global = true, env = "TIKVPN_SERVICE_TIMEOUT", default_value_t = config::SERVICE_TIMEOUT_SECS)]
    pub service_timeout: u64,

    /// Directory client bundles are exported under [default: ~/tikvpn-clients]
    #[arg(long, global = true, env = "TIKVPN_BUNDLE_DIR")]
    pub bundle_dir: Option<PathBuf>,

    /// Overwrite an existing client bundle without asking
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

impl ServerArgs {
    pub fn to_config(&self) -> ProvisionConfig {
        let defaults = ProvisionConfig::default();
        let mut layout = Layout::system();
        if let Some(dir) = &self.bundle_dir {
            layout.bundle_root = dir.clone();
        }
        ProvisionConfig {
            params: ServerParams {
                port: self.port,
                proto: self.proto,
                cipher: self.cipher,
                auth: self.auth,
                network: self.network,
                peer: self.peer,
                ..defaults.params
            },
            client_name: self.client.clone(),
            force_ca: self.force_ca,
            dh_bits: self.dh_bits,
            service_timeout: Duration::from_secs(self.service_timeout),
            layout,
            ..defaults
        }
    }
}

/// Decide what happens to an existing bundle for `client` before any work
/// starts, so the prompt never interrupts a half-finished run.
pub fn bundle_mode(layout: &Layout, client: &str, yes: bool) -> Result<BundleMode> {
    if yes {
        return Ok(BundleMode::Overwrite);
    }
    let bundle = ClientBundle::at(&layout.bundle_dir(client), client);
    if !bundle.exists() {
        return Ok(BundleMode::Create);
    }
    if !console::user_attended() {
        // Nobody to ask; the export stage reports the conflict.
        return Ok(BundleMode::Create);
    }
    if tikvpn_ui::prompt::confirm_overwrite(&bundle.dir)? {
        Ok(BundleMode::Overwrite)
    } else {
        Ok(BundleMode::KeepExisting)
    }
}
