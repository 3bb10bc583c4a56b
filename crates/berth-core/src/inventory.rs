//! One-shot inventory of the catalog against what the runtime reports.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use berth_runtime::{ContainerRuntime, InstanceState};
use serde::Serialize;

use crate::domain::Result;
use crate::registry::ServiceRegistry;

/// Observed state of a catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub service_id: String,
    pub port: u16,
    pub dependencies: Vec<String>,
    /// `None` when no instance with the service's name exists.
    pub status: Option<String>,
    pub running: bool,
    pub networks: BTreeSet<String>,
}

/// Match every catalog service with its instance, in catalog order.
pub async fn collect_inventory(
    registry: &ServiceRegistry,
    runtime: &dyn ContainerRuntime,
) -> Result<Vec<InventoryEntry>> {
    let mut instances: BTreeMap<String, InstanceState> = runtime
        .list_instances()
        .await?
        .into_iter()
        .map(|i| (i.name.clone(), i))
        .collect();

    Ok(registry
        .services()
        .map(|service| {
            let instance = instances.remove(&service.id);
            InventoryEntry {
                service_id: service.id.clone(),
                port: service.port,
                dependencies: service.dependencies.clone(),
                running: instance.as_ref().is_some_and(|i| i.running),
                status: instance.as_ref().map(|i| i.status.clone()),
                networks: instance.map(|i| i.networks).unwrap_or_default(),
            }
        })
        .collect())
}

/// Fixed-width table.
pub fn render_inventory(entries: &[InventoryEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>5}  {:<10} {:<20} DEPENDENCIES",
        "SERVICE", "PORT", "STATUS", "NETWORKS"
    );
    for entry in entries {
        let networks = entry.networks.iter().cloned().collect::<Vec<_>>().join(",");
        let _ = writeln!(
            out,
            "{:<16} {:>5}  {:<10} {:<20} {}",
            entry.service_id,
            entry.port,
            entry.status.as_deref().unwrap_or("absent"),
            if networks.is_empty() { "-" } else { networks.as_str() },
            entry.dependencies.join(",")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Fleet;
    use berth_runtime::fakes::MemoryRuntime;

    #[tokio::test]
    async fn test_inventory_marks_absent_and_running() {
        let fleet = Fleet::builtin().unwrap();
        let runtime = MemoryRuntime::new()
            .with_running("chat-service", "letzgo-network", 3002)
            .with_running("letzgo-postgres", "letzgo-network", 5432);

        let entries = collect_inventory(&fleet.registry, &runtime).await.unwrap();
        assert_eq!(entries.len(), fleet.registry.services().count());

        let chat = entries.iter().find(|e| e.service_id == "chat-service").unwrap();
        assert!(chat.running);
        assert_eq!(chat.status.as_deref(), Some("running"));
        assert!(chat.networks.contains("letzgo-network"));

        let auth = entries.iter().find(|e| e.service_id == "auth-service").unwrap();
        assert!(!auth.running);
        assert!(auth.status.is_none());

        // Infrastructure is not part of the service inventory.
        assert!(entries.iter().all(|e| e.service_id != "letzgo-postgres"));

        let table = render_inventory(&entries);
        assert!(table.starts_with("SERVICE"));
        assert!(table.contains("absent"));
        assert!(table.contains("postgres,mongodb"));
    }
}
