//! The eight provisioning stages, run strictly in order.
//!
//! Fatal failures stop the run and come back as a `PipelineError` naming
//! the stage and what to look at next. Host mutation and address lookup
//! failures degrade the run instead and end up in the summary.

use crate::bundle::{self, ClientBundle, ExportOutcome};
use crate::commands::{CommandRunner, LocalRunner};
use crate::easyrsa::{CertTool, EasyRsa};
use crate::host::{self, Change, FirewallStatus};
use crate::packages;
use crate::pki::{validate_subject, InitOutcome, IssuedCert, PkiManager};
use crate::preflight::{self, HostFacts};
use crate::render::{self, ParsedConfig, ServerPaths};
use crate::report::{self, AddressSource, ConnectionReport};
use crate::service::{ServiceController, ServiceStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tikvpn_core::config::ADDRESS_PLACEHOLDER;
use tikvpn_core::{
    AppError, CertRole, PipelineError, ProvisionConfig, RunRecord, ServerParams, Stage,
};
use tikvpn_ui::progress;

/// Result of a successful provisioning or add-client run.
#[derive(Debug, Clone)]
pub struct ProvisionSummary {
    pub record: RunRecord,
    /// The connection report as printed; the saved file also lists warnings.
    pub report: String,
    pub record_path: PathBuf,
}

/// Read-only view of a provisioned host.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub unit: String,
    pub service: ServiceStatus,
    pub port_spec: String,
    pub firewall: FirewallStatus,
    pub ip_forward: String,
    pub server: Option<ParsedConfig>,
    pub clients: Vec<String>,
    pub ca_fingerprint: Option<String>,
    pub last_run: Option<RunRecord>,
}

pub struct Pipeline {
    config: ProvisionConfig,
    runner: Arc<dyn CommandRunner>,
    pki: PkiManager,
    sources: Vec<Box<dyn AddressSource>>,
}

impl Pipeline {
    pub fn new(
        config: ProvisionConfig,
        runner: Arc<dyn CommandRunner>,
        tool: Arc<dyn CertTool>,
    ) -> Self {
        let pki = PkiManager::new(config.layout.pki_dir.clone(), tool);
        Self {
            config,
            runner,
            pki,
            sources: report::default_sources(),
        }
    }

    /// Wired to the real host: local commands and easy-rsa.
    pub fn system(config: ProvisionConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(LocalRunner);
        let tool = Arc::new(EasyRsa::new(config.layout.easyrsa_bin.clone(), runner.clone()));
        Self::new(config, runner, tool)
    }

    pub fn with_sources(mut self, sources: Vec<Box<dyn AddressSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Run stages 1 through 8.
    pub async fn run(&self, facts: &HostFacts) -> Result<ProvisionSummary, PipelineError> {
        let cfg = &self.config;
        let runner = self.runner.as_ref();
        let layout = &cfg.layout;
        let mut warnings = Vec::new();

        // Step 1: privilege, OS family and parameters
        progress::stage(Stage::Preflight, "Checking privileges and host OS...");
        let host_info = preflight::check(facts).map_err(|e| self.fail(Stage::Preflight, e))?;
        self.check_params().map_err(|e| self.fail(Stage::Preflight, e))?;
        progress::detail(&format!("Host: {}", host_info.pretty_name));
        progress::detail(&format!(
            "Server: {} {} {} / {} for {}",
            cfg.params.port_spec(),
            cfg.params.network,
            cfg.params.cipher,
            cfg.params.auth,
            cfg.params.peer
        ));

        // Step 2: packages
        progress::stage(Stage::Dependencies, "Ensuring required packages...");
        let installed = packages::ensure(runner, host_info.family)
            .await
            .map_err(|e| self.fail(Stage::Dependencies, e))?;
        if installed.is_empty() {
            progress::skipped("All packages already installed");
        } else {
            progress::detail(&format!("Installed: {}", installed.join(", ")));
        }

        // Step 3: CA, server and client certificates, DH parameters
        progress::stage(Stage::Pki, "Setting up PKI...");
        let (server, client, dh) = self.pki_stage().await.map_err(|e| self.fail(Stage::Pki, e))?;

        // Step 4: server.conf
        progress::stage(Stage::Render, "Rendering server configuration...");
        let paths = ServerPaths {
            ca: self.pki.paths().ca_cert(),
            cert: server.cert,
            key: server.key,
            dh,
        };
        render::write(&cfg.params, &paths, &layout.server_conf)
            .map_err(|e| self.fail(Stage::Render, e))?;
        progress::detail(&format!("Wrote {}", layout.server_conf.display()));

        // Step 5: forwarding, firewall, unit override; failures degrade
        progress::stage(Stage::HostState, "Configuring forwarding, firewall and service...");
        let host_report = host::apply_all(runner, cfg).await;
        for outcome in &host_report.outcomes {
            match &outcome.result {
                Ok(Change::Applied) => progress::detail(&format!("{}: applied", outcome.step)),
                Ok(Change::AlreadyInPlace) => {
                    progress::skipped(&format!("{}: already in place", outcome.step))
                }
                Err(e) => progress::warn(&format!("{}: {e}", outcome.step)),
            }
        }
        warnings.extend(host_report.warnings());

        // Step 6: start and wait for the daemon
        progress::stage(Stage::Service, "Starting OpenVPN...");
        let controller = self.controller();
        let pb = tikvpn_ui::spinner(&format!("Waiting for {} to become active...", controller.unit()));
        let started = controller.start().await;
        pb.finish_and_clear();
        let status = started.map_err(|e| self.fail(Stage::Service, e))?;
        progress::detail(&format!(
            "{} is {}{}",
            controller.unit(),
            status.state,
            if status.enabled { " and enabled" } else { "" }
        ));

        // Step 7: client bundle
        progress::stage(Stage::Bundle, "Exporting client bundle...");
        let bundle = self.export(&client).map_err(|e| self.fail(Stage::Bundle, e))?;

        // Step 8: address detection, report, run record
        progress::stage(Stage::Report, "Writing connection report...");
        self.report(&cfg.params, &bundle, warnings)
            .await
            .map_err(|e| self.fail(Stage::Report, e))
    }

    /// Issue one more client certificate under the existing CA and export
    /// its bundle. Server configuration and host state are left alone.
    pub async fn add_client(
        &self,
        facts: &HostFacts,
        name: &str,
    ) -> Result<ProvisionSummary, PipelineError> {
        preflight::check(facts).map_err(|e| self.fail(Stage::Preflight, e))?;
        validate_subject(name).map_err(|e| self.fail(Stage::Preflight, e))?;
        if name == self.config.server_name {
            return Err(self.fail(
                Stage::Preflight,
                AppError::InvalidParam(format!("'{name}' is the server certificate name")),
            ));
        }
        if !self.pki.has_ca() {
            return Err(PipelineError::new(
                Stage::Pki,
                "run `tikvpn provision` first",
                AppError::Pki(format!(
                    "no certificate authority at {}",
                    self.pki.paths().ca_cert().display()
                )),
            ));
        }

        progress::detail(&format!("Issuing client certificate '{name}'..."));
        let client = self
            .issue_or_reuse(name, CertRole::Client)
            .await
            .map_err(|e| self.fail(Stage::Pki, e))?;
        let bundle = self.export(&client).map_err(|e| self.fail(Stage::Bundle, e))?;

        // The report must describe the server as deployed, not as the
        // current flags would render it.
        let (params, _) = self
            .deployed_params()
            .map_err(|e| self.fail(Stage::Report, e))?;
        self.report(&params, &bundle, Vec::new())
            .await
            .map_err(|e| self.fail(Stage::Report, e))
    }

    /// Inspect the host without changing anything.
    pub async fn status(&self) -> Result<ServerStatus, AppError> {
        let runner = self.runner.as_ref();
        let (params, server) = self.deployed_params()?;
        let controller = self.controller();

        let clients = self
            .pki
            .issued_names()?
            .into_iter()
            .filter(|n| *n != self.config.server_name)
            .collect();
        let ca_fingerprint = if self.pki.has_ca() {
            Some(self.pki.ca_fingerprint()?)
        } else {
            None
        };

        Ok(ServerStatus {
            unit: controller.unit().to_string(),
            service: controller.status().await?,
            port_spec: params.port_spec(),
            firewall: host::inspect_firewall(runner, &params).await?,
            ip_forward: host::ip_forward_runtime(runner).await?,
            server,
            clients,
            ca_fingerprint,
            last_run: RunRecord::latest(&self.config.layout)?,
        })
    }

    fn check_params(&self) -> Result<(), AppError> {
        let cfg = &self.config;
        validate_subject(&cfg.server_name)?;
        validate_subject(&cfg.client_name)?;
        if cfg.client_name == cfg.server_name {
            return Err(AppError::InvalidParam(format!(
                "client name '{}' must differ from the server certificate name",
                cfg.client_name
            )));
        }
        if cfg.dh_bits < 2048 {
            return Err(AppError::InvalidParam(format!(
                "DH size {} is too small (need at least 2048)",
                cfg.dh_bits
            )));
        }
        render::validate(&cfg.params)
    }

    async fn pki_stage(&self) -> Result<(IssuedCert, IssuedCert, PathBuf), AppError> {
        let cfg = &self.config;
        match self.pki.initialize().await? {
            InitOutcome::Created => {
                progress::detail(&format!("Initialized {}", self.pki.paths().root().display()))
            }
            InitOutcome::AlreadyPresent => progress::skipped("PKI already initialized"),
        }

        match self.pki.issue_ca(&cfg.ca_common_name, cfg.force_ca).await {
            Ok(()) => progress::detail(&format!("Created CA '{}'", cfg.ca_common_name)),
            Err(AppError::CaAlreadyExists(path)) => {
                progress::skipped(&format!("Reusing CA at {}", path.display()))
            }
            Err(e) => return Err(e),
        }

        // DH runs while certificates are issued; dropping the task aborts it.
        let dh_pending = !self.pki.paths().dh().is_file();
        let dh = self.pki.spawn_dh(cfg.dh_bits);

        let server = self.issue_or_reuse(&cfg.server_name, CertRole::Server).await?;
        let client = self.issue_or_reuse(&cfg.client_name, CertRole::Client).await?;

        let pb = dh_pending.then(|| {
            tikvpn_ui::spinner(&format!(
                "Generating {}-bit DH parameters (this can take a few minutes)...",
                cfg.dh_bits
            ))
        });
        let result = dh.wait().await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let dh_path = result?;
        if dh_pending {
            progress::detail(&format!("DH parameters written to {}", dh_path.display()));
        } else {
            progress::skipped("DH parameters already present");
        }

        Ok((server, client, dh_path))
    }

    /// Issue `name`, or hand back the existing pair if it was issued on an
    /// earlier run.
    async fn issue_or_reuse(&self, name: &str, role: CertRole) -> Result<IssuedCert, AppError> {
        match self.pki.issue_certificate(name, role).await {
            Ok(cert) => {
                progress::detail(&format!("Issued {role} certificate '{name}'"));
                Ok(cert)
            }
            Err(AppError::DuplicateSubject(_)) => {
                let cert = self.pki.existing(name, role).ok_or_else(|| {
                    AppError::Pki(format!(
                        "certificate '{name}' exists but its key is missing from {}",
                        self.pki.paths().private_dir().display()
                    ))
                })?;
                progress::skipped(&format!("Reusing {role} certificate '{name}'"));
                Ok(cert)
            }
            Err(e) => Err(e),
        }
    }

    fn export(&self, client: &IssuedCert) -> Result<ClientBundle, AppError> {
        let outcome = bundle::export(
            self.pki.paths(),
            client,
            &self.config.layout.bundle_root,
            self.config.bundle_mode,
        )?;
        match &outcome {
            ExportOutcome::Written(b) => {
                progress::detail(&format!("Wrote {} ({})", b.dir.display(), b.file_names().join(", ")))
            }
            ExportOutcome::KeptExisting(b) => {
                progress::skipped(&format!("Kept existing bundle at {}", b.dir.display()))
            }
        }
        Ok(outcome.bundle().clone())
    }

    async fn report(
        &self,
        params: &ServerParams,
        bundle: &ClientBundle,
        mut warnings: Vec<String>,
    ) -> Result<ProvisionSummary, AppError> {
        let layout = &self.config.layout;

        let pb = tikvpn_ui::spinner("Detecting external address...");
        let address = report::resolve_external(&self.sources).await;
        pb.finish_and_clear();
        if address.is_incomplete() {
            let tried: Vec<String> = address
                .failures
                .iter()
                .map(|(source, err)| format!("{source}: {err}"))
                .collect();
            warnings.push(format!(
                "external address not detected ({}); replace {ADDRESS_PLACEHOLDER} by hand",
                tried.join("; ")
            ));
        } else {
            progress::detail(&format!("External address: {}", address.value));
        }

        let ca_fingerprint = match self.pki.ca_fingerprint() {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::warn!(error = %e, "could not fingerprint CA certificate");
                None
            }
        };

        let unit = layout.service_unit();
        let body = ConnectionReport {
            params,
            address: &address,
            bundle,
            ca_fingerprint: ca_fingerprint.as_deref(),
            service_unit: &unit,
        }
        .render();

        let report_path = layout.report_path(&bundle.client);
        report::save(&report_path, &body, &warnings)?;

        let record = RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            client_name: bundle.client.clone(),
            address: address.value.clone(),
            address_source: address.source.clone(),
            port: params.port,
            proto: params.proto,
            cipher: params.cipher,
            auth: params.auth,
            network: params.network,
            bundle_dir: Some(bundle.dir.clone()),
            report_path,
            ca_fingerprint,
            warnings,
            created_at: chrono::Utc::now(),
        };
        let record_path = record.save(layout)?;
        tracing::info!(id = %record.id, path = %record_path.display(), "run record saved");

        Ok(ProvisionSummary {
            record,
            report: body,
            record_path,
        })
    }

    /// Parameters of the server as rendered on disk, falling back to the
    /// configured ones before the first render.
    fn deployed_params(&self) -> Result<(ServerParams, Option<ParsedConfig>), AppError> {
        let mut params = self.config.params.clone();
        let path = &self.config.layout.server_conf;
        if !path.is_file() {
            return Ok((params, None));
        }
        let parsed = render::parse(&std::fs::read_to_string(path)?)?;
        params.port = parsed.port;
        params.proto = parsed.proto;
        params.cipher = parsed.cipher;
        params.auth = parsed.auth;
        params.network = parsed.network;
        (params.keepalive_interval, params.keepalive_timeout) = parsed.keepalive;
        if let Some(peer) = parsed.peer {
            params.peer = peer;
        }
        Ok((params, Some(parsed)))
    }

    fn controller(&self) -> ServiceController<'_> {
        ServiceController::new(
            self.runner.as_ref(),
            self.config.layout.service_unit(),
            self.config.service_timeout,
            self.config.service_poll,
        )
    }

    fn fail(&self, stage: Stage, source: AppError) -> PipelineError {
        PipelineError::new(stage, self.hint(stage), source)
    }

    /// Where an operator should look after `stage` failed.
    fn hint(&self, stage: Stage) -> String {
        let layout = &self.config.layout;
        match stage {
            Stage::Preflight => {
                "run as root (sudo tikvpn) on RHEL/Rocky/AlmaLinux 8+ or Fedora, and check the flags"
                    .into()
            }
            Stage::Dependencies => {
                "dnf repolist; dnf install -y epel-release openvpn easy-rsa firewalld openssl".into()
            }
            Stage::Pki => format!(
                "ls -lR {} (use --force-ca to rebuild the CA)",
                layout.pki_dir.display()
            ),
            Stage::Render => "check --port, --proto, --cipher, --auth and --network against --peer".into(),
            Stage::HostState => "firewall-cmd --list-all; sysctl net.ipv4.ip_forward".into(),
            Stage::Service => format!("journalctl -xeu {}", layout.service_unit()),
            Stage::Bundle => format!(
                "re-run with --yes to replace {}, or remove it",
                layout.bundle_dir(&self.config.client_name).display()
            ),
            Stage::Report => format!("check write access to {}", layout.state_dir.display()),
        }
    }
}
