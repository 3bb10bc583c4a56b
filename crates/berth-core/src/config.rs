//! Fleet configuration.
//!
//! A single TOML document describes the shared network, the health and
//! deployment policy, the static default environment, and the catalog. A
//! built-in document for the default fleet ships with the crate.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DeployError, Result};
use crate::polling::PollPolicy;
use crate::registry::{InfraComponent, ServiceDescriptor, ServiceRegistry};

const BUILTIN_FLEET: &str = include_str!("../config/fleet.toml");

/// Secret-looking variable names. Matching keys never leave the process in
/// reports or logs. Any name containing `KEY` counts, so a few harmless
/// names are over-redacted.
pub const DEFAULT_SECRET_KEY_PATTERN: &str = r"(?i)(PASSWORD|PASSWD|SECRET|TOKEN|CREDENTIAL|KEY)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Well-known network created when no reference instance is configured.
    pub name: String,
    /// Running infrastructure instance whose network services must join.
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub attempts: u32,
    pub delay_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
    /// Host the published ports are reached on.
    pub host: String,
    pub remediation_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            host: "127.0.0.1".to_string(),
            remediation_attempts: 3,
        }
    }
}

impl HealthConfig {
    /// Policy for the initial verification.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.attempts, Duration::from_secs(self.delay_secs))
    }

    /// Shorter policy for the post-remediation verification.
    pub fn remediation_policy(&self) -> PollPolicy {
        PollPolicy::new(self.remediation_attempts, Duration::from_secs(self.delay_secs))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Health URL for a service published on `port`.
    pub fn url_for(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub image_prefix: String,
    pub image_tag: String,
    pub restart_policy: String,
    pub log_tail_lines: usize,
    pub secret_key_pattern: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            image_prefix: String::new(),
            image_tag: "latest".to_string(),
            restart_policy: "on-failure".to_string(),
            log_tail_lines: 50,
            secret_key_pattern: DEFAULT_SECRET_KEY_PATTERN.to_string(),
        }
    }
}

impl DeployConfig {
    /// Image reference for a service.
    pub fn image_for(&self, service_id: &str) -> String {
        format!("{}{}:{}", self.image_prefix, service_id, self.image_tag)
    }
}

/// External schema bootstrap tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Program and leading arguments; `--service <id> --store <kind>` is appended.
    pub command: Vec<String>,
    #[serde(default = "default_bootstrap_timeout")]
    pub timeout_secs: u64,
}

fn default_bootstrap_timeout() -> u64 {
    300
}

impl BootstrapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Raw TOML document.
#[derive(Debug, Clone, Deserialize)]
struct FleetDocument {
    network: NetworkConfig,
    #[serde(default)]
    health: HealthConfig,
    #[serde(default)]
    deploy: DeployConfig,
    #[serde(default)]
    bootstrap: Option<BootstrapConfig>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
    #[serde(default)]
    required_secrets: Vec<String>,
    #[serde(default)]
    infrastructure: Vec<InfraComponent>,
    #[serde(default)]
    services: Vec<ServiceDescriptor>,
}

/// Policy and environment settings shared by every deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub network: NetworkConfig,
    pub health: HealthConfig,
    pub deploy: DeployConfig,
    pub bootstrap: Option<BootstrapConfig>,
    pub defaults: BTreeMap<String, String>,
    pub required_secrets: Vec<String>,
}

/// A loaded and validated fleet.
#[derive(Debug, Clone)]
pub struct Fleet {
    pub settings: Settings,
    pub registry: ServiceRegistry,
}

impl Fleet {
    /// Parse and validate a fleet document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let doc: FleetDocument =
            toml::from_str(source).map_err(|e| DeployError::InvalidConfig(e.to_string()))?;

        if doc.network.name.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "network.name must not be empty".to_string(),
            ));
        }
        if doc.health.attempts == 0 || doc.health.remediation_attempts == 0 {
            return Err(DeployError::InvalidConfig(
                "health attempt counts must be at least 1".to_string(),
            ));
        }
        if doc.health.timeout_secs == 0 {
            return Err(DeployError::InvalidConfig(
                "health.timeout_secs must be at least 1".to_string(),
            ));
        }
        if !doc.health.path.starts_with('/') {
            return Err(DeployError::InvalidConfig(format!(
                "health.path must start with '/': {}",
                doc.health.path
            )));
        }
        if doc.bootstrap.as_ref().is_some_and(|b| b.command.is_empty()) {
            return Err(DeployError::InvalidConfig(
                "bootstrap.command must name a program".to_string(),
            ));
        }
        regex::Regex::new(&doc.deploy.secret_key_pattern)
            .map_err(|e| DeployError::InvalidConfig(format!("deploy.secret_key_pattern: {e}")))?;

        let registry = ServiceRegistry::new(doc.services, doc.infrastructure)?;
        Ok(Self {
            settings: Settings {
                network: doc.network,
                health: doc.health,
                deploy: doc.deploy,
                bootstrap: doc.bootstrap,
                defaults: doc.defaults,
                required_secrets: doc.required_secrets,
            },
            registry,
        })
    }

    /// Load a fleet document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// The fleet definition shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_FLEET)
    }

    /// Load `path` when given, the built-in fleet otherwise.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }
}
