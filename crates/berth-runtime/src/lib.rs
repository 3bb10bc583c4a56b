//! Berth Runtime: the external boundary of the deployment orchestrator
//!
//! This crate defines the interfaces the orchestrator consumes and their
//! production adapters:
//!
//! - [`ContainerRuntime`]: start/stop/remove/inspect/exec/logs ([`DockerCli`])
//! - [`HealthProbe`]: one `GET` against a health endpoint ([`HttpHealthProbe`])
//! - [`SchemaBootstrapper`]: ensure tables/collections exist ([`CommandBootstrapper`])
//!
//! In-memory fakes for all three live in [`fakes`].

pub mod bootstrap;
pub mod docker;
pub mod error;
pub mod fakes;
pub mod probe;
pub mod runtime;

pub use bootstrap::{CommandBootstrapper, SchemaBootstrapper, StoreKind};
pub use docker::DockerCli;
pub use error::{RuntimeError, RuntimeResult};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeResponse};
pub use runtime::{ContainerRuntime, ExecOutput, InstanceState, LaunchSpec};
