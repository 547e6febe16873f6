//! CA lifecycle, certificate issuance and DH parameters.
//!
//! The on-disk tree follows easy-rsa's layout:
//!
//! ```text
//! pki/
//!   ca.crt
//!   dh.pem
//!   issued/<name>.crt
//!   private/ca.key
//!   private/<name>.key
//! ```

use crate::easyrsa::CertTool;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tikvpn_core::{fsutil, AppError, CertRole};
use tokio::task::JoinHandle;

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Names whose key, cert or bundle files would land on the CA's or DH's.
const RESERVED_SUBJECTS: &[&str] = &["ca", "dh"];

#[derive(Debug, Clone)]
pub struct PkiPaths {
    root: PathBuf,
}

impl PkiPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.root.join("ca.crt")
    }

    pub fn ca_key(&self) -> PathBuf {
        self.private_dir().join("ca.key")
    }

    pub fn issued_dir(&self) -> PathBuf {
        self.root.join("issued")
    }

    pub fn private_dir(&self) -> PathBuf {
        self.root.join("private")
    }

    pub fn cert(&self, name: &str) -> PathBuf {
        self.issued_dir().join(format!("{name}.crt"))
    }

    pub fn key(&self, name: &str) -> PathBuf {
        self.private_dir().join(format!("{name}.key"))
    }

    pub fn dh(&self) -> PathBuf {
        self.root.join("dh.pem")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyPresent,
}

/// A certificate/key pair on disk, signed by the PKI's CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCert {
    pub name: String,
    pub role: CertRole,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone)]
pub struct PkiManager {
    paths: PkiPaths,
    tool: Arc<dyn CertTool>,
}

impl PkiManager {
    pub fn new(pki_dir: impl Into<PathBuf>, tool: Arc<dyn CertTool>) -> Self {
        Self {
            paths: PkiPaths::new(pki_dir),
            tool,
        }
    }

    pub fn paths(&self) -> &PkiPaths {
        &self.paths
    }

    pub fn is_initialized(&self) -> bool {
        self.paths.private_dir().is_dir()
    }

    pub fn has_ca(&self) -> bool {
        self.paths.ca_cert().is_file()
    }

    /// Create the PKI tree unless one is already there. Never wipes state.
    pub async fn initialize(&self) -> Result<InitOutcome, AppError> {
        if self.is_initialized() {
            tracing::info!(pki = %self.paths.root().display(), "PKI already initialized");
            return Ok(InitOutcome::AlreadyPresent);
        }
        if let Some(parent) = self.paths.root().parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.tool.init_pki(self.paths.root()).await?;
        if !self.is_initialized() {
            return Err(AppError::Pki(format!(
                "init-pki did not create {}",
                self.paths.private_dir().display()
            )));
        }
        fsutil::set_mode(&self.paths.private_dir(), 0o700)?;
        Ok(InitOutcome::Created)
    }

    /// Build the self-signed CA.
    ///
    /// With `force`, an existing PKI is wiped and rebuilt, which invalidates
    /// every certificate issued so far.
    pub async fn issue_ca(&self, common_name: &str, force: bool) -> Result<(), AppError> {
        if self.has_ca() {
            if !force {
                return Err(AppError::CaAlreadyExists(self.paths.ca_cert()));
            }
            tracing::warn!(pki = %self.paths.root().display(), "rebuilding PKI, existing certificates become invalid");
            std::fs::remove_dir_all(self.paths.root())?;
            self.initialize().await?;
        } else if !self.is_initialized() {
            self.initialize().await?;
        }

        self.tool.build_ca(self.paths.root(), common_name).await?;

        let (cert, key) = (self.paths.ca_cert(), self.paths.ca_key());
        if !cert.is_file() || !key.is_file() {
            return Err(AppError::Pki("build-ca did not produce ca.crt and ca.key".into()));
        }
        fsutil::set_mode(&key, 0o600)?;
        Ok(())
    }

    /// Generate key, request and CA-signed certificate for `name`.
    ///
    /// Refuses to re-sign a name that has already been issued; existing
    /// files are left untouched.
    pub async fn issue_certificate(
        &self,
        name: &str,
        role: CertRole,
    ) -> Result<IssuedCert, AppError> {
        validate_subject(name)?;
        if !self.has_ca() {
            return Err(AppError::Pki(format!(
                "no certificate authority at {}",
                self.paths.ca_cert().display()
            )));
        }
        if self.paths.cert(name).exists() {
            return Err(AppError::DuplicateSubject(name.to_string()));
        }

        self.tool.issue(self.paths.root(), name, role).await?;

        let issued = IssuedCert {
            name: name.to_string(),
            role,
            cert: self.paths.cert(name),
            key: self.paths.key(name),
        };
        let pem = std::fs::read_to_string(&issued.cert).map_err(|e| {
            AppError::Pki(format!("missing {} after issuing: {e}", issued.cert.display()))
        })?;
        if !pem.contains(PEM_CERT_BEGIN) {
            return Err(AppError::Pki(format!(
                "{} is not a PEM certificate",
                issued.cert.display()
            )));
        }
        if !issued.key.is_file() {
            return Err(AppError::Pki(format!(
                "missing {} after issuing",
                issued.key.display()
            )));
        }
        fsutil::set_mode(&issued.key, 0o600)?;
        Ok(issued)
    }

    /// The already-issued certificate for `name`, if both files exist.
    pub fn existing(&self, name: &str, role: CertRole) -> Option<IssuedCert> {
        let cert = self.paths.cert(name);
        let key = self.paths.key(name);
        (cert.is_file() && key.is_file()).then(|| IssuedCert {
            name: name.to_string(),
            role,
            cert,
            key,
        })
    }

    /// Produce `dh.pem` unless it already exists.
    ///
    /// The tool writes into a temp file in the PKI directory; it is renamed
    /// into place only once complete. If this future is dropped the temp
    /// file is removed with it.
    pub async fn generate_dh(&self, bits: u32) -> Result<PathBuf, AppError> {
        let target = self.paths.dh();
        if target.is_file() {
            tracing::info!(path = %target.display(), "DH parameters already present");
            return Ok(target);
        }

        let tmp = tempfile::Builder::new()
            .prefix(".dh-")
            .suffix(".pem.tmp")
            .tempfile_in(self.paths.root())?
            .into_temp_path();

        self.tool.gen_dh(&tmp, bits).await?;

        let pem = std::fs::read_to_string(&tmp)?;
        if !pem.contains("DH PARAMETERS") {
            return Err(AppError::Pki("DH generation produced no parameters".into()));
        }
        fsutil::set_mode(&tmp, 0o600)?;
        tmp.persist(&target).map_err(|e| AppError::Io(e.error))?;
        Ok(target)
    }

    /// Run `generate_dh` on the runtime in the background. Dropping the
    /// returned handle aborts the work.
    pub fn spawn_dh(&self, bits: u32) -> DhTask {
        let pki = self.clone();
        DhTask(tokio::spawn(async move { pki.generate_dh(bits).await }))
    }

    /// SHA-256 fingerprint of the CA certificate's DER encoding, in the
    /// `AB:CD:...` form `openssl x509 -fingerprint` prints.
    pub fn ca_fingerprint(&self) -> Result<String, AppError> {
        let pem = std::fs::read_to_string(self.paths.ca_cert())?;
        fingerprint_pem(&pem)
    }

    /// Names of every issued certificate, sorted.
    pub fn issued_names(&self) -> Result<Vec<String>, AppError> {
        let dir = self.paths.issued_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("crt") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Background DH generation. Aborts the task when dropped.
pub struct DhTask(JoinHandle<Result<PathBuf, AppError>>);

impl DhTask {
    pub async fn wait(mut self) -> Result<PathBuf, AppError> {
        match (&mut self.0).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AppError::Cancelled),
            Err(e) => Err(AppError::Pki(format!("DH generation task failed: {e}"))),
        }
    }
}

impl Drop for DhTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Subject names end up in file names and RouterOS commands.
pub fn validate_subject(name: &str) -> Result<(), AppError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(AppError::InvalidParam(format!(
            "'{name}' is not a valid certificate name (use letters, digits, '-', '_', '.')"
        )));
    }
    if RESERVED_SUBJECTS
        .iter()
        .any(|r| name.eq_ignore_ascii_case(r))
    {
        return Err(AppError::InvalidParam(format!(
            "'{name}' is reserved for the certificate authority"
        )));
    }
    Ok(())
}

pub fn fingerprint_pem(pem: &str) -> Result<String, AppError> {
    let start = pem
        .find(PEM_CERT_BEGIN)
        .ok_or_else(|| AppError::Pki("no PEM certificate found".into()))?
        + PEM_CERT_BEGIN.len();
    let end = pem[start..]
        .find(PEM_CERT_END)
        .ok_or_else(|| AppError::Pki("unterminated PEM certificate".into()))?
        + start;
    let body: String = pem[start..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let der = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AppError::Pki(format!("invalid PEM body: {e}")))?;

    let digest = Sha256::digest(&der);
    let hex = hex::encode_upper(digest);
    let pairs: Vec<&str> = hex
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect();
    Ok(pairs.join(":"))
}
