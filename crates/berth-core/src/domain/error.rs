//! Domain-level error taxonomy for Berth.

use std::path::PathBuf;

use berth_runtime::{RuntimeError, StoreKind};
use serde::{Deserialize, Serialize};

use super::attempt::AttemptOutcome;
use super::report::DiagnosticReport;

/// Pipeline stage, used to say where a fatal error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registry,
    Network,
    Environment,
    Bootstrap,
    Artifact,
    Deploy,
    Verify,
    Diagnose,
    Remediate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Registry => "registry",
            Stage::Network => "network",
            Stage::Environment => "environment",
            Stage::Bootstrap => "bootstrap",
            Stage::Artifact => "artifact",
            Stage::Deploy => "deploy",
            Stage::Verify => "verify",
            Stage::Diagnose => "diagnose",
            Stage::Remediate => "remediate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Berth domain errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("reference infrastructure instance '{reference}' is not running")]
    InfrastructureNotFound { reference: String },

    #[error("secret '{key}' required by {service} is missing from the secret set")]
    MissingSecret { service: String, key: String },

    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("corrupt artifact {}: {reason}", .path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("image {image} is not present after install")]
    InstallVerificationFailed { image: String },

    #[error("schema bootstrap failed for {service} ({store} store)")]
    BootstrapFailed { service: String, store: StoreKind },

    #[error("runtime rejected start of {service}: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("health probe {attempt} timed out")]
    ProbeTimeout { attempt: u32 },

    #[error("{service} failed health verification after {attempts} attempt(s)")]
    VerificationFailed { service: String, attempts: u32 },

    #[error("{service} is still unhealthy after remediation")]
    RemediationExhausted {
        service: String,
        report: Box<DiagnosticReport>,
        /// Why the redeploy never reached a healthy verdict, when it failed
        /// before or during re-verification.
        cause: Option<String>,
    },

    #[error("invalid attempt transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: AttemptOutcome,
        to: AttemptOutcome,
    },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("cancelled by termination signal")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Stage this error is inherent to. Plumbing errors (runtime, I/O,
    /// serialization, cancellation) can happen anywhere and return `None`.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DeployError::UnknownService(_) | DeployError::InvalidConfig(_) => Some(Stage::Registry),
            DeployError::InfrastructureNotFound { .. } => Some(Stage::Network),
            DeployError::MissingSecret { .. } => Some(Stage::Environment),
            DeployError::BootstrapFailed { .. } => Some(Stage::Bootstrap),
            DeployError::ArtifactNotFound(_)
            | DeployError::CorruptArtifact { .. }
            | DeployError::InstallVerificationFailed { .. } => Some(Stage::Artifact),
            DeployError::StartFailed { .. } => Some(Stage::Deploy),
            DeployError::ProbeTimeout { .. }
            | DeployError::VerificationFailed { .. }
            | DeployError::InvalidTransition { .. } => Some(Stage::Verify),
            DeployError::RemediationExhausted { .. } => Some(Stage::Remediate),
            DeployError::DigestMismatch { .. }
            | DeployError::Cancelled
            | DeployError::Runtime(_)
            | DeployError::Serialization(_)
            | DeployError::Io(_) => None,
        }
    }

    /// The diagnostic report carried by a terminal verification failure.
    pub fn report(&self) -> Option<&DiagnosticReport> {
        match self {
            DeployError::RemediationExhausted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The underlying reason behind a failed remediation.
    pub fn cause(&self) -> Option<&str> {
        match self {
            DeployError::RemediationExhausted { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

/// Result type for Berth domain operations.
pub type Result<T> = std::result::Result<T, DeployError>;
