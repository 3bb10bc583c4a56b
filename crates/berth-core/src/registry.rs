//! Service registry: the static catalog of services and infrastructure.
//!
//! Loaded once per run and queried by value. Every other component asks the
//! registry for ports and dependencies instead of keeping its own table.

use std::collections::{BTreeMap, BTreeSet};

use berth_runtime::StoreKind;
use serde::{Deserialize, Serialize};

use crate::domain::{DeployError, Result};

/// A persistent-store object (table or collection) a service needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreObject {
    pub store: StoreKind,
    pub name: String,
}

/// One deployable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique identifier, also the instance name and canonical hostname.
    pub id: String,
    /// Fixed external port, unique across the catalog.
    pub port: u16,
    /// Infrastructure components or other services this service calls.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_objects: Vec<StoreObject>,
}

impl ServiceDescriptor {
    /// Store kinds this service keeps objects in.
    pub fn stores(&self) -> BTreeSet<StoreKind> {
        self.required_objects.iter().map(|o| o.store).collect()
    }
}

/// One shared infrastructure component (database, cache, broker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraComponent {
    pub id: String,
    /// Canonical hostname on the shared network.
    pub host: String,
    pub port: u16,
    /// URL scheme of the connection string (`postgresql`, `mongodb`, ...).
    pub scheme: String,
    /// Variable that receives the connection string.
    pub url_var: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Secret key holding the password, if the component needs one.
    #[serde(default)]
    pub password_secret: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// Query string appended to the connection URL.
    #[serde(default)]
    pub params: Option<String>,
}

/// A resolved dependency of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency<'a> {
    Infrastructure(&'a InfraComponent),
    Service(&'a ServiceDescriptor),
}

impl<'a> Dependency<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Dependency::Infrastructure(c) => &c.id,
            Dependency::Service(s) => &s.id,
        }
    }

    /// Canonical hostname on the shared network.
    pub fn host(&self) -> &'a str {
        match self {
            Dependency::Infrastructure(c) => &c.host,
            Dependency::Service(s) => &s.id,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Dependency::Infrastructure(c) => c.port,
            Dependency::Service(s) => s.port,
        }
    }
}

/// Validated, immutable catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDescriptor>,
    infrastructure: BTreeMap<String, InfraComponent>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting duplicate ids, duplicate ports and
    /// dependencies that name nothing in the catalog.
    pub fn new(services: Vec<ServiceDescriptor>, infrastructure: Vec<InfraComponent>) -> Result<Self> {
        let mut registry = ServiceRegistry::default();

        for component in infrastructure {
            if registry.infrastructure.contains_key(&component.id) {
                return Err(DeployError::InvalidConfig(format!(
                    "duplicate infrastructure id '{}'",
                    component.id
                )));
            }
            registry
                .infrastructure
                .insert(component.id.clone(), component);
        }

        let mut ports: BTreeMap<u16, String> = BTreeMap::new();
        for service in services {
            if service.id.trim().is_empty() {
                return Err(DeployError::InvalidConfig(
                    "service id must not be empty".to_string(),
                ));
            }
            if registry.services.contains_key(&service.id)
                || registry.infrastructure.contains_key(&service.id)
            {
                return Err(DeployError::InvalidConfig(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
            if let Some(owner) = ports.insert(service.port, service.id.clone()) {
                return Err(DeployError::InvalidConfig(format!(
                    "port {} is assigned to both '{}' and '{}'",
                    service.port, owner, service.id
                )));
            }
            registry.services.insert(service.id.clone(), service);
        }

        for service in registry.services.values() {
            for dependency in &service.dependencies {
                if dependency == &service.id {
                    return Err(DeployError::InvalidConfig(format!(
                        "service '{}' depends on itself",
                        service.id
                    )));
                }
                if registry.dependency(dependency).is_none() {
                    return Err(DeployError::InvalidConfig(format!(
                        "service '{}' depends on unknown '{}'",
                        service.id, dependency
                    )));
                }
            }
        }

        Ok(registry)
    }

    /// Look up a service by identifier.
    pub fn lookup(&self, service_id: &str) -> Result<&ServiceDescriptor> {
        self.services
            .get(service_id)
            .ok_or_else(|| DeployError::UnknownService(service_id.to_string()))
    }

    /// Fixed port of a service.
    pub fn port_of(&self, service_id: &str) -> Result<u16> {
        self.lookup(service_id).map(|s| s.port)
    }

    /// Resolve a dependency identifier against infrastructure first, then services.
    pub fn dependency(&self, id: &str) -> Option<Dependency<'_>> {
        self.infrastructure
            .get(id)
            .map(Dependency::Infrastructure)
            .or_else(|| self.services.get(id).map(Dependency::Service))
    }

    /// Resolved dependencies of a service, in declaration order.
    pub fn dependencies_of<'a>(&'a self, service: &'a ServiceDescriptor) -> Vec<Dependency<'a>> {
        service
            .dependencies
            .iter()
            .filter_map(|id| self.dependency(id))
            .collect()
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn infrastructure(&self) -> impl Iterator<Item = &InfraComponent> {
        self.infrastructure.values()
    }
}
