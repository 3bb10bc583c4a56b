//! Structured diagnostic report produced after a failed verification.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the diagnostic sweep learned about one failed instance.
///
/// Every field degrades independently: a field that could not be collected
/// is `false` or empty, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub service_id: String,
    pub collected_at: DateTime<Utc>,
    /// Network the instance should be attached to.
    pub expected_network: String,
    pub container_running: bool,
    pub network_membership: BTreeSet<String>,
    /// Dependency id -> hostname resolvable from inside the instance.
    pub dns_resolution: BTreeMap<String, bool>,
    /// Dependency id -> TCP port reachable from inside the instance.
    pub port_reachable: BTreeMap<String, bool>,
    pub log_tail: Vec<String>,
    /// Environment with secrets removed or masked.
    pub env_snapshot: BTreeMap<String, String>,
}

/// A suspected cause derived from a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    InstanceNotRunning,
    NetworkMismatch { expected: String, actual: Vec<String> },
    DnsUnresolved { dependency: String },
    PortUnreachable { dependency: String },
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::InstanceNotRunning => write!(f, "instance is not running"),
            Finding::NetworkMismatch { expected, actual } => {
                if actual.is_empty() {
                    write!(f, "instance is attached to no network (expected {expected})")
                } else {
                    write!(
                        f,
                        "instance is attached to [{}] instead of {expected}",
                        actual.join(", ")
                    )
                }
            }
            Finding::DnsUnresolved { dependency } => {
                write!(f, "dependency {dependency} does not resolve from the instance")
            }
            Finding::PortUnreachable { dependency } => {
                write!(f, "dependency {dependency} port is unreachable from the instance")
            }
        }
    }
}

impl DiagnosticReport {
    /// Report with every field degraded.
    pub fn empty(service_id: impl Into<String>, expected_network: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            collected_at: Utc::now(),
            expected_network: expected_network.into(),
            container_running: false,
            network_membership: BTreeSet::new(),
            dns_resolution: BTreeMap::new(),
            port_reachable: BTreeMap::new(),
            log_tail: Vec::new(),
            env_snapshot: BTreeMap::new(),
        }
    }

    /// Suspected causes, in a fixed order.
    ///
    /// Informational only; remediation runs regardless of what is found.
    pub fn findings(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        if !self.container_running {
            findings.push(Finding::InstanceNotRunning);
        }
        if !self.network_membership.contains(&self.expected_network) {
            findings.push(Finding::NetworkMismatch {
                expected: self.expected_network.clone(),
                actual: self.network_membership.iter().cloned().collect(),
            });
        }
        for (dependency, resolved) in &self.dns_resolution {
            if !resolved {
                findings.push(Finding::DnsUnresolved {
                    dependency: dependency.clone(),
                });
            }
        }
        for (dependency, reachable) in &self.port_reachable {
            if !reachable {
                findings.push(Finding::PortUnreachable {
                    dependency: dependency.clone(),
                });
            }
        }
        findings
    }
}
