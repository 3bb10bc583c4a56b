//! Container runtime control surface.
//!
//! The orchestrator only ever talks to the runtime through
//! [`ContainerRuntime`]: start/stop/remove an instance by name, list
//! instances with their network and port bindings, execute a command inside
//! a running instance, fetch recent logs, and manage images and networks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Observed state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    /// Instance name (unique per host).
    pub name: String,

    /// Runtime-assigned identifier.
    pub id: String,

    /// Image the instance was created from.
    pub image: String,

    /// Whether the instance is currently running.
    pub running: bool,

    /// Runtime status string (`running`, `exited`, `restarting`, ...).
    pub status: String,

    /// Networks the instance is attached to.
    pub networks: BTreeSet<String>,

    /// Published host ports.
    pub ports: BTreeSet<u16>,

    /// Environment the instance was started with.
    pub env: BTreeMap<String, String>,
}

/// Everything needed to start one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    /// Published as `port:port`.
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub restart_policy: String,
}

impl LaunchSpec {
    /// Renders the environment as `KEY=value` lines for an env file.
    ///
    /// The env-file format has no quoting, so a line break inside a key or
    /// value would inject an extra variable. Such entries are rejected with
    /// `RuntimeError::InvalidSpec`.
    pub fn env_file_contents(&self) -> RuntimeResult<String> {
        let mut out = String::new();
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || has_line_break(key) {
                return Err(RuntimeError::InvalidSpec(format!(
                    "{}: invalid env key {key:?}",
                    self.name
                )));
            }
            if has_line_break(value) {
                return Err(RuntimeError::InvalidSpec(format!(
                    "{}: value of {key} contains a line break",
                    self.name
                )));
            }
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        Ok(out)
    }
}

fn has_line_break(text: &str) -> bool {
    text.contains(['\n', '\r', '\0'])
}

/// Output of a command executed inside an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runtime control surface.
///
/// Guarantees expected from implementations:
/// - `stop`/`remove` of an absent instance fail with `RuntimeError::NotFound`.
/// - `start` fails with `RuntimeError::Conflict` when the name is taken.
/// - `start` fails with `RuntimeError::InvalidSpec` when an env entry cannot
///   be written as a single `KEY=value` line.
/// - `create_network` on an existing network is a no-op.
/// - `exec` reports non-zero exits through [`ExecOutput`], not as errors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspect one instance. `Ok(None)` when it does not exist.
    async fn inspect(&self, name: &str) -> RuntimeResult<Option<InstanceState>>;

    /// List all instances, running or not.
    async fn list_instances(&self) -> RuntimeResult<Vec<InstanceState>>;

    /// Whether a network with this name exists.
    async fn network_exists(&self, network: &str) -> RuntimeResult<bool>;

    /// Create a bridge network. No-op if it already exists.
    async fn create_network(&self, network: &str) -> RuntimeResult<()>;

    /// Load an image archive, returning the image references it contained.
    async fn load_image(&self, archive: &Path) -> RuntimeResult<Vec<String>>;

    /// Whether an image reference is present locally.
    async fn image_exists(&self, image: &str) -> RuntimeResult<bool>;

    /// Stop a running instance.
    async fn stop(&self, name: &str) -> RuntimeResult<()>;

    /// Remove an instance.
    async fn remove(&self, name: &str) -> RuntimeResult<()>;

    /// Start a new detached instance and return its identifier.
    async fn start(&self, spec: &LaunchSpec) -> RuntimeResult<String>;

    /// Execute a command inside a running instance.
    async fn exec(&self, name: &str, command: &[String]) -> RuntimeResult<ExecOutput>;

    /// Fetch the last `lines` log lines of an instance.
    async fn logs(&self, name: &str, lines: usize) -> RuntimeResult<Vec<String>>;
}
