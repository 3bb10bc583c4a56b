//! Network resolution.
//!
//! Services must join the network the infrastructure actually sits on,
//! otherwise dependency hostnames silently fail to resolve. The resolver
//! therefore derives the network from a running reference instance on every
//! attempt instead of trusting a configured or cached name.

use std::collections::BTreeSet;
use std::sync::Arc;

use berth_runtime::ContainerRuntime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::domain::{DeployError, Result};
use crate::obs::emit_network_resolved;

/// Networks every engine creates on its own; none provide name resolution
/// between instances except the user-defined ones.
const BUILTIN_NETWORKS: [&str; 3] = ["bridge", "host", "none"];

/// The network a deployment attempt joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub name: String,
    /// Names of running instances attached to the network.
    pub hosts: BTreeSet<String>,
}

/// Resolves (and if needed creates) the shared network.
///
/// Holds no mutable state, so one resolver can serve concurrent pipelines.
#[derive(Clone)]
pub struct NetworkResolver {
    runtime: Arc<dyn ContainerRuntime>,
    config: NetworkConfig,
}

impl NetworkResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: NetworkConfig) -> Self {
        Self { runtime, config }
    }

    /// Resolve the network from the configured reference instance, or ensure
    /// the well-known network exists when no reference is configured.
    pub async fn resolve(&self) -> Result<NetworkContext> {
        let name = match &self.config.reference {
            Some(reference) => self.network_of(reference).await?,
            None => {
                self.ensure_network(&self.config.name).await?;
                self.config.name.clone()
            }
        };

        let hosts = self
            .runtime
            .list_instances()
            .await?
            .into_iter()
            .filter(|i| i.running && i.networks.contains(&name))
            .map(|i| i.name)
            .collect();

        let context = NetworkContext { name, hosts };
        emit_network_resolved(&context.name, context.hosts.len());
        Ok(context)
    }

    /// Network the running `reference` instance is attached to.
    async fn network_of(&self, reference: &str) -> Result<String> {
        let instance = match self.runtime.inspect(reference).await? {
            Some(instance) if instance.running => instance,
            _ => {
                return Err(DeployError::InfrastructureNotFound {
                    reference: reference.to_string(),
                })
            }
        };

        let (user_defined, builtin): (Vec<String>, Vec<String>) = instance
            .networks
            .into_iter()
            .partition(|n| !BUILTIN_NETWORKS.contains(&n.as_str()));

        if user_defined.contains(&self.config.name) {
            return Ok(self.config.name.clone());
        }
        if let Some(first) = user_defined.into_iter().next() {
            if first != self.config.name {
                info!(
                    reference = %reference,
                    network = %first,
                    configured = %self.config.name,
                    "reference instance is on a different network than configured; following it"
                );
            }
            return Ok(first);
        }
        match builtin.into_iter().next() {
            Some(network) => {
                warn!(
                    reference = %reference,
                    network = %network,
                    "reference instance is only on a builtin network; hostnames will not resolve"
                );
                Ok(network)
            }
            None => {
                warn!(reference = %reference, "reference instance has no network; using default");
                self.ensure_network(&self.config.name).await?;
                Ok(self.config.name.clone())
            }
        }
    }

    /// Create `network` unless it already exists.
    async fn ensure_network(&self, network: &str) -> Result<()> {
        if !self.runtime.network_exists(network).await? {
            info!(network = %network, "creating bridge network");
            self.runtime.create_network(network).await?;
        }
        Ok(())
    }
}
