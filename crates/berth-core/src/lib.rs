//! Berth Core Library
//!
//! Deploys catalog services onto a shared host, verifies their health, and
//! on failure runs one diagnostic sweep and one bounded remediation cycle.
//!
//! The entry point is [`DeploymentPipeline`]; the stages it drives are
//! usable on their own.

pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod environment;
pub mod executor;
pub mod health;
pub mod inventory;
pub mod journal;
pub mod network;
pub mod obs;
pub mod pipeline;
pub mod polling;
pub mod redact;
pub mod registry;
pub mod remediation;
pub mod reporting;
pub mod telemetry;

pub use artifact::ArtifactLoader;
pub use config::{BootstrapConfig, DeployConfig, Fleet, HealthConfig, NetworkConfig, Settings};
pub use diagnostics::DiagnosticCollector;
pub use domain::{
    AttemptOutcome, ContentDigest, DeployError, DeploymentAttempt, DiagnosticReport, Finding,
    HealthProbeResult, Result, Stage,
};
pub use environment::{
    EnvOverrides, EnvironmentResolver, ResolvedEnvironment, SecretSet, SecretSource,
};
pub use executor::DeploymentExecutor;
pub use health::HealthVerifier;
pub use inventory::{collect_inventory, render_inventory, InventoryEntry};
pub use journal::AttemptJournal;
pub use network::{NetworkContext, NetworkResolver};
pub use pipeline::{Collaborators, DeployOptions, DeploymentPipeline, DeploymentRun, PipelineFailure};
pub use polling::{shutdown_channel, PollPolicy, Poller, Shutdown, ShutdownTrigger};
pub use redact::Redactor;
pub use registry::{Dependency, InfraComponent, ServiceDescriptor, ServiceRegistry, StoreObject};
pub use remediation::{Remediation, RemediationEngine};

/// Berth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
