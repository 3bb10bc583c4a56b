//! Deployment executor: replace whatever runs under a service's name with
//! exactly one new instance.
//!
//! Stop-before-start is the only mutual exclusion between deployments of
//! the same service; the fixed port can never be bound twice.

use std::sync::Arc;

use berth_runtime::{ContainerRuntime, LaunchSpec, RuntimeError};
use tracing::{debug, info};

use crate::config::DeployConfig;
use crate::domain::{DeployError, Result};
use crate::environment::ResolvedEnvironment;
use crate::network::NetworkContext;
use crate::obs::emit_instance_started;
use crate::registry::ServiceDescriptor;

#[derive(Clone)]
pub struct DeploymentExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    config: DeployConfig,
}

impl DeploymentExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: DeployConfig) -> Self {
        Self { runtime, config }
    }

    /// Stop and remove any instance named after the service, then start a new
    /// one. Returns the runtime's instance identifier.
    pub async fn deploy(
        &self,
        service: &ServiceDescriptor,
        network: &NetworkContext,
        env: &ResolvedEnvironment,
    ) -> Result<String> {
        self.retire(&service.id).await?;

        let spec = LaunchSpec {
            name: service.id.clone(),
            image: self.config.image_for(&service.id),
            network: network.name.clone(),
            port: service.port,
            env: env.as_map().clone(),
            restart_policy: self.config.restart_policy.clone(),
        };

        let instance_id = self
            .runtime
            .start(&spec)
            .await
            .map_err(|e| DeployError::StartFailed {
                service: service.id.clone(),
                reason: e.to_string(),
            })?;

        emit_instance_started(&service.id, &instance_id, &network.name);
        Ok(instance_id)
    }

    /// Best-effort stop and remove. Absence is not an error.
    pub async fn retire(&self, name: &str) -> Result<()> {
        match self.runtime.stop(name).await {
            Ok(()) => info!(instance = %name, "stopped previous instance"),
            Err(RuntimeError::NotFound(_)) => debug!(instance = %name, "no previous instance"),
            Err(e) => return Err(e.into()),
        }
        match self.runtime.remove(name).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_runtime::fakes::{MemoryRuntime, RuntimeCall};
    use std::collections::{BTreeMap, BTreeSet};

    fn chat() -> ServiceDescriptor {
        ServiceDescriptor {
            id: "chat-service".to_string(),
            port: 3002,
            dependencies: vec!["postgres".to_string()],
            required_objects: Vec::new(),
        }
    }

    fn network() -> NetworkContext {
        NetworkContext {
            name: "letzgo-network".to_string(),
            hosts: BTreeSet::from(["letzgo-postgres".to_string()]),
        }
    }

    fn executor(runtime: Arc<MemoryRuntime>) -> DeploymentExecutor {
        DeploymentExecutor::new(runtime, DeployConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_deploy() {
        let runtime = Arc::new(MemoryRuntime::new().with_network("letzgo-network"));
        let id = executor(runtime.clone())
            .deploy(&chat(), &network(), &ResolvedEnvironment::default())
            .await
            .expect("deploy");

        let instance = runtime.instance("chat-service").expect("started");
        assert_eq!(instance.id, id);
        assert_eq!(instance.image, "chat-service:latest");
        assert!(instance.networks.contains("letzgo-network"));
        assert_eq!(runtime.running_on_port(3002), 1);
    }

    #[tokio::test]
    async fn test_redeploy_stops_before_start() {
        let runtime = Arc::new(MemoryRuntime::new().with_network("letzgo-network"));
        let executor = executor(runtime.clone());
        for _ in 0..3 {
            executor
                .deploy(&chat(), &network(), &ResolvedEnvironment::default())
                .await
                .expect("deploy");
            assert_eq!(runtime.running_on_port(3002), 1);
        }

        let calls = runtime.calls();
        let last_stop = calls
            .iter()
            .rposition(|c| *c == RuntimeCall::Stop("chat-service".to_string()))
            .unwrap();
        let last_start = calls
            .iter()
            .rposition(|c| *c == RuntimeCall::Start("chat-service".to_string()))
            .unwrap();
        assert!(last_stop < last_start);
        assert_eq!(runtime.starts_for("chat-service"), 3);
    }

    #[tokio::test]
    async fn test_start_rejection_is_start_failed() {
        let runtime = Arc::new(MemoryRuntime::new().with_network("letzgo-network"));
        runtime.fail_next_starts(1);
        let err = executor(runtime.clone())
            .deploy(&chat(), &network(), &ResolvedEnvironment::default())
            .await
            .expect_err("rejected");
        assert!(matches!(err, DeployError::StartFailed { service, .. } if service == "chat-service"));
        assert_eq!(runtime.running_on_port(3002), 0);
    }

    #[tokio::test]
    async fn test_environment_is_injected() {
        let runtime = Arc::new(MemoryRuntime::new().with_network("letzgo-network"));
        let fleet = crate::config::Fleet::builtin().unwrap();
        let secrets = crate::environment::SecretSet::from_pairs([
            ("JWT_SECRET", "jwt"),
            ("POSTGRES_PASSWORD", "pg"),
            ("MONGODB_PASSWORD", "mongo"),
        ]);
        let env = crate::environment::EnvironmentResolver::new(&fleet)
            .resolve("chat-service", &secrets, &Default::default())
            .unwrap();

        executor(runtime.clone())
            .deploy(&chat(), &network(), &env)
            .await
            .unwrap();
        let started: BTreeMap<_, _> = runtime.instance("chat-service").unwrap().env;
        assert_eq!(started, env.as_map().clone());
    }
}
