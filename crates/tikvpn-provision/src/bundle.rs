use crate::pki::{IssuedCert, PkiPaths};
use std::path::{Path, PathBuf};
use tikvpn_core::{fsutil, AppError, BundleMode};

/// The three files a RouterOS `/certificate import` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBundle {
    pub client: String,
    pub dir: PathBuf,
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ClientBundle {
    pub fn at(dir: &Path, client: &str) -> Self {
        Self {
            client: client.to_string(),
            dir: dir.to_path_buf(),
            ca_cert: dir.join("ca.crt"),
            cert: dir.join(format!("{client}.crt")),
            key: dir.join(format!("{client}.key")),
        }
    }

    pub fn files(&self) -> [&Path; 3] {
        [&self.ca_cert, &self.cert, &self.key]
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files()
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    /// True when any bundle file is already present.
    pub fn exists(&self) -> bool {
        self.files().iter().any(|p| p.exists())
    }

    /// True when all three files are present and byte-identical to `sources`.
    fn matches(&self, sources: &[PathBuf; 3]) -> Result<bool, AppError> {
        for (dst, src) in self.files().into_iter().zip(sources) {
            if !dst.is_file() || std::fs::read(dst)? != std::fs::read(src)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(ClientBundle),
    KeptExisting(ClientBundle),
}

impl ExportOutcome {
    pub fn bundle(&self) -> &ClientBundle {
        match self {
            ExportOutcome::Written(b) | ExportOutcome::KeptExisting(b) => b,
        }
    }
}

/// Copy CA cert, client cert and client key into `<root>/<client>/`.
///
/// The directory is 0700 and every file 0600. An existing bundle is only
/// replaced in `BundleMode::Overwrite`; one that already holds exactly the
/// current material is kept in any mode.
pub fn export(
    pki: &PkiPaths,
    client: &IssuedCert,
    root: &Path,
    mode: BundleMode,
) -> Result<ExportOutcome, AppError> {
    let dir = root.join(&client.name);
    let bundle = ClientBundle::at(&dir, &client.name);
    let sources = [pki.ca_cert(), client.cert.clone(), client.key.clone()];

    if bundle.exists() {
        if mode != BundleMode::Overwrite && bundle.matches(&sources)? {
            tracing::info!(dir = %dir.display(), "client bundle already up to date");
            return Ok(ExportOutcome::KeptExisting(bundle));
        }
        match mode {
            BundleMode::Create => return Err(AppError::BundleExists(dir)),
            BundleMode::KeepExisting => {
                tracing::info!(dir = %dir.display(), "keeping existing client bundle");
                return Ok(ExportOutcome::KeptExisting(bundle));
            }
            BundleMode::Overwrite => {
                tracing::info!(dir = %dir.display(), "overwriting client bundle");
            }
        }
    }

    fsutil::ensure_dir(&dir, 0o700)?;
    for (src, dst) in sources.iter().zip(bundle.files()) {
        let data = std::fs::read(src)?;
        fsutil::write_atomic(dst, &data, 0o600)?;
    }

    // The directory must hold exactly the three bundle files.
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if !bundle.files().contains(&path.as_path()) {
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
    }

    Ok(ExportOutcome::Written(bundle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::PkiManager;
    use crate::testing::FakeCertTool;
    use std::sync::Arc;
    use tikvpn_core::CertRole;

    async fn issued(tmp: &Path) -> (PkiManager, IssuedCert) {
        let pki = PkiManager::new(tmp.join("pki"), Arc::new(FakeCertTool::default()));
        pki.issue_ca("tikvpn CA", false).await.unwrap();
        let cert = pki
            .issue_certificate("mikrotik", CertRole::Client)
            .await
            .unwrap();
        (pki, cert)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn exports_three_private_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (pki, cert) = issued(tmp.path()).await;
        let root = tmp.path().join("clients");

        let out = export(pki.paths(), &cert, &root, BundleMode::Create).unwrap();
        let bundle = out.bundle();
        assert_eq!(entries(&bundle.dir), ["ca.crt", "mikrotik.crt", "mikrotik.key"]);
        assert_eq!(
            std::fs::read(&bundle.key).unwrap(),
            std::fs::read(&cert.key).unwrap()
        );

        #[cfg(unix)]
        {
            assert_eq!(fsutil::mode_of(&bundle.dir).unwrap(), 0o700);
            for file in bundle.files() {
                assert_eq!(fsutil::mode_of(file).unwrap() & 0o077, 0);
            }
        }
    }

    #[tokio::test]
    async fn identical_bundle_is_kept_without_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let (pki, cert) = issued(tmp.path()).await;
        let root = tmp.path().join("clients");
        export(pki.paths(), &cert, &root, BundleMode::Create).unwrap();

        let again = export(pki.paths(), &cert, &root, BundleMode::Create).unwrap();
        assert!(matches!(again, ExportOutcome::KeptExisting(_)));
        assert_eq!(
            entries(&root.join("mikrotik")),
            ["ca.crt", "mikrotik.crt", "mikrotik.key"]
        );
    }

    #[tokio::test]
    async fn refuses_to_overwrite_without_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let (pki, cert) = issued(tmp.path()).await;
        let root = tmp.path().join("clients");
        export(pki.paths(), &cert, &root, BundleMode::Create).unwrap();
        std::fs::write(root.join("mikrotik/mikrotik.key"), "edited").unwrap();

        let err = export(pki.paths(), &cert, &root, BundleMode::Create).unwrap_err();
        assert!(matches!(err, AppError::BundleExists(_)));

        let kept = export(pki.paths(), &cert, &root, BundleMode::KeepExisting).unwrap();
        assert!(matches!(kept, ExportOutcome::KeptExisting(_)));
        assert_eq!(
            std::fs::read_to_string(root.join("mikrotik/mikrotik.key")).unwrap(),
            "edited"
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_and_prunes() {
        let tmp = tempfile::tempdir().unwrap();
        let (pki, cert) = issued(tmp.path()).await;
        let root = tmp.path().join("clients");
        export(pki.paths(), &cert, &root, BundleMode::Create).unwrap();
        std::fs::write(root.join("mikrotik/notes.txt"), "stray").unwrap();

        export(pki.paths(), &cert, &root, BundleMode::Overwrite).unwrap();
        assert_eq!(
            entries(&root.join("mikrotik")),
            ["ca.crt", "mikrotik.crt", "mikrotik.key"]
        );
    }
}
