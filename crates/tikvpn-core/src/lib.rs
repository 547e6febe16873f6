pub mod config;
pub mod error;
pub mod fsutil;
pub mod types;

pub use config::{Layout, ProvisionConfig, RunRecord};
pub use error::{AppError, PipelineError};
pub use types::{
    AuthDigest, BundleMode, CertRole, Cipher, Network, PeerProfile, Protocol, ServerParams,
    Stage,
};
