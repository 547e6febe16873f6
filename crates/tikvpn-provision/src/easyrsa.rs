use crate::commands::{run_checked, Cmd, CommandRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tikvpn_core::{AppError, CertRole};

/// The external certificate tool, reduced to the four things provisioning
/// needs from it. Implementations only create files; existence checks and
/// policy live in `PkiManager`.
#[async_trait]
pub trait CertTool: Send + Sync {
    /// Create an empty PKI tree at `pki`.
    async fn init_pki(&self, pki: &Path) -> Result<(), AppError>;

    /// Create `ca.crt` and `private/ca.key` under `pki`.
    async fn build_ca(&self, pki: &Path, common_name: &str) -> Result<(), AppError>;

    /// Create `issued/<name>.crt` and `private/<name>.key`, signed by the CA.
    async fn issue(&self, pki: &Path, name: &str, role: CertRole) -> Result<(), AppError>;

    /// Write Diffie-Hellman parameters of `bits` size to `out`.
    async fn gen_dh(&self, out: &Path, bits: u32) -> Result<(), AppError>;
}

/// easy-rsa 3 driven in batch mode, plus `openssl dhparam`.
pub struct EasyRsa {
    bin: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl EasyRsa {
    pub fn new(bin: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    fn cmd(&self, pki: &Path) -> Cmd {
        Cmd::new(self.bin.to_string_lossy())
            .env("EASYRSA_BATCH", "1")
            .env("EASYRSA_PKI", pki.to_string_lossy())
    }

    async fn run(&self, cmd: Cmd) -> Result<(), AppError> {
        run_checked(self.runner.as_ref(), &cmd)
            .await
            .map(|_| ())
            .map_err(|e| AppError::Pki(e.to_string()))
    }
}

#[async_trait]
impl CertTool for EasyRsa {
    async fn init_pki(&self, pki: &Path) -> Result<(), AppError> {
        self.run(self.cmd(pki).arg("init-pki")).await
    }

    async fn build_ca(&self, pki: &Path, common_name: &str) -> Result<(), AppError> {
        let cmd = self
            .cmd(pki)
            .env("EASYRSA_REQ_CN", common_name)
            .args(["build-ca", "nopass"]);
        self.run(cmd).await
    }

    async fn issue(&self, pki: &Path, name: &str, role: CertRole) -> Result<(), AppError> {
        let action = match role {
            CertRole::Server => "build-server-full",
            CertRole::Client => "build-client-full",
        };
        let cmd = self.cmd(pki).args([action, name, "nopass"]);
        self.run(cmd).await
    }

    async fn gen_dh(&self, out: &Path, bits: u32) -> Result<(), AppError> {
        let cmd = Cmd::new("openssl")
            .args(["dhparam", "-out"])
            .arg(out.to_string_lossy())
            .arg(bits.to_string());
        self.run(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn drives_easyrsa_in_batch_mode() {
        let host = Arc::new(FakeHost::new());
        let tool = EasyRsa::new("/usr/share/easy-rsa/3/easyrsa", host.clone());
        let pki = Path::new("/etc/openvpn/easy-rsa/pki");

        tool.build_ca(pki, "tikvpn CA").await.unwrap();
        tool.issue(pki, "mikrotik", CertRole::Client).await.unwrap();

        let calls = host.calls();
        assert_eq!(calls[0].args, ["build-ca", "nopass"]);
        assert_eq!(calls[0].env_value("EASYRSA_BATCH"), Some("1"));
        assert_eq!(calls[0].env_value("EASYRSA_REQ_CN"), Some("tikvpn CA"));
        assert_eq!(
            calls[1].env_value("EASYRSA_PKI"),
            Some("/etc/openvpn/easy-rsa/pki")
        );
        assert_eq!(calls[1].args, ["build-client-full", "mikrotik", "nopass"]);
    }

    #[tokio::test]
    async fn tool_failure_becomes_pki_error() {
        let host = Arc::new(FakeHost::new());
        host.with_state(|s| s.fail_programs.insert("openssl".into()));
        let tool = EasyRsa::new("easyrsa", host);

        let err = tool.gen_dh(Path::new("/tmp/dh.pem"), 2048).await.unwrap_err();
        assert!(matches!(err, AppError::Pki(_)));
    }
}
