use crate::types::Stage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Must run as root (effective uid is {euid})")]
    InsufficientPrivilege { euid: u32 },

    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    #[error("Failed to install {packages}: {message}")]
    DependencyInstall { packages: String, message: String },

    #[error("A certificate authority already exists at {}", .0.display())]
    CaAlreadyExists(PathBuf),

    #[error("A certificate for '{0}' has already been issued")]
    DuplicateSubject(String),

    #[error("PKI error: {0}")]
    Pki(String),

    #[error("Invalid server configuration: {0}")]
    RenderValidation(String),

    #[error("Host mutation failed ({step}): {message}")]
    HostMutation { step: String, message: String },

    #[error("{unit} did not become active within {waited_secs}s")]
    ServiceStartTimeout { unit: String, waited_secs: u64 },

    #[error("{unit} entered the failed state")]
    ServiceFailed { unit: String },

    #[error("Could not resolve the external address: {0}")]
    AddressResolution(String),

    #[error("A client bundle already exists at {}", .0.display())]
    BundleExists(PathBuf),

    #[error("`{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A fatal failure, tagged with the stage it happened in and the command an
/// operator should look at next.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub hint: String,
    #[source]
    pub source: AppError,
}

impl PipelineError {
    pub fn new(stage: Stage, hint: impl Into<String>, source: AppError) -> Self {
        Self {
            stage,
            hint: hint.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, AppError::Cancelled)
    }
}
