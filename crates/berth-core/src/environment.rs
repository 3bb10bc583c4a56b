//! Environment resolution.
//!
//! A service's environment is merged, lowest precedence first, from:
//!
//! 1. the fleet's static defaults,
//! 2. the secret set (every entry),
//! 3. runtime identity (`SERVICE_NAME`, `PORT`),
//! 4. per-attempt overrides (network corrections from remediation),
//! 5. per-dependency connection variables pinned to canonical hostnames.
//!
//! Connection variables are applied last so that no stale or guessed
//! hostname from an earlier layer can survive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::Fleet;
use crate::domain::{DeployError, Result};
use crate::network::NetworkContext;
use crate::registry::{Dependency, InfraComponent};

/// Flat secret set loaded from an owner-only `KEY=value` file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretSet {
    values: BTreeMap<String, String>,
}

impl std::fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSet")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretSet {
    /// Read a secret file. The file is never modified.
    pub fn from_env_file(path: &Path) -> Result<Self> {
        warn_if_shared(path);

        let iter = dotenvy::from_path_iter(path).map_err(|e| env_file_error(path, e))?;
        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| env_file_error(path, e))?;
            values.insert(key, value);
        }
        debug!(path = %path.display(), entries = values.len(), "loaded secret file");
        Ok(Self { values })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}

/// Where secrets come from. A file is re-read on every load so that each
/// attempt sees the current secret set.
#[derive(Debug, Clone)]
pub enum SecretSource {
    File(PathBuf),
    Static(SecretSet),
}

impl SecretSource {
    pub fn load(&self) -> Result<SecretSet> {
        match self {
            SecretSource::File(path) => SecretSet::from_env_file(path),
            SecretSource::Static(secrets) => Ok(secrets.clone()),
        }
    }
}

fn env_file_error(path: &Path, err: dotenvy::Error) -> DeployError {
    match err {
        dotenvy::Error::Io(io) => DeployError::Io(io),
        other => DeployError::InvalidConfig(format!("{}: {other}", path.display())),
    }
}

#[cfg(unix)]
fn warn_if_shared(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "secret file is readable by group or others; restrict it to the owner"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_shared(_path: &Path) {}

/// Per-attempt variables layered over defaults and secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOverrides {
    values: BTreeMap<String, String>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides derived from a freshly resolved network.
    pub fn for_network(network: &NetworkContext) -> Self {
        let mut overrides = Self::new();
        overrides.set("NETWORK_NAME", &network.name);
        overrides
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fully resolved environment of one service instance.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for ResolvedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEnvironment")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolvedEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// Derives a service's environment from the fleet and a secret set.
///
/// Pure: the same inputs always give the same environment.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentResolver<'a> {
    fleet: &'a Fleet,
}

impl<'a> EnvironmentResolver<'a> {
    pub fn new(fleet: &'a Fleet) -> Self {
        Self { fleet }
    }

    pub fn resolve(
        &self,
        service_id: &str,
        secrets: &SecretSet,
        overrides: &EnvOverrides,
    ) -> Result<ResolvedEnvironment> {
        let registry = &self.fleet.registry;
        let service = registry.lookup(service_id)?;

        let missing = |key: &str| DeployError::MissingSecret {
            service: service_id.to_string(),
            key: key.to_string(),
        };
        for key in &self.fleet.settings.required_secrets {
            if secrets.get(key).is_none() {
                return Err(missing(key));
            }
        }

        let mut vars = self.fleet.settings.defaults.clone();
        vars.extend(secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.insert("SERVICE_NAME".to_string(), service.id.clone());
        vars.insert("PORT".to_string(), service.port.to_string());
        vars.extend(overrides.values.iter().map(|(k, v)| (k.clone(), v.clone())));

        for dependency in registry.dependencies_of(service) {
            let prefix = env_prefix(dependency.id());
            let url = match dependency {
                Dependency::Infrastructure(component) => {
                    let password = match &component.password_secret {
                        Some(key) => Some(secrets.get(key).ok_or_else(|| missing(key))?),
                        None => None,
                    };
                    vars.insert(component.url_var.clone(), connection_url(component, password)?);
                    None
                }
                Dependency::Service(target) => Some(format!("http://{}:{}", target.id, target.port)),
            };
            if let Some(url) = url {
                vars.insert(format!("{prefix}_URL"), url);
            }
            vars.insert(format!("{prefix}_HOST"), dependency.host().to_string());
            vars.insert(format!("{prefix}_PORT"), dependency.port().to_string());
        }

        Ok(ResolvedEnvironment { vars })
    }
}

/// `auth-service` -> `AUTH_SERVICE`.
fn env_prefix(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Connection string pointing at the component's canonical host.
fn connection_url(component: &InfraComponent, password: Option<&str>) -> Result<String> {
    let invalid = |what: &str| {
        DeployError::InvalidConfig(format!("cannot build {} URL for {}", what, component.id))
    };

    let mut url = Url::parse(&format!(
        "{}://{}:{}",
        component.scheme, component.host, component.port
    ))
    .map_err(|e| DeployError::InvalidConfig(format!("{}: {e}", component.id)))?;

    if let Some(user) = &component.user {
        url.set_username(user).map_err(|_| invalid("user"))?;
    }
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| invalid("password"))?;
    }
    if let Some(database) = &component.database {
        url.set_path(&format!("/{database}"));
    }
    if let Some(params) = &component.params {
        url.set_query(Some(params));
    }
    Ok(url.to_string())
}
