pub mod bundle;
pub mod commands;
pub mod easyrsa;
pub mod host;
pub mod packages;
pub mod pipeline;
pub mod pki;
pub mod preflight;
pub mod render;
pub mod report;
pub mod service;

#[cfg(test)]
mod testing;

pub use pipeline::{Pipeline, ProvisionSummary, ServerStatus};
pub use preflight::HostFacts;
