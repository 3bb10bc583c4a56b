//! Schema bootstrapper boundary.
//!
//! The orchestrator never creates tables or collections itself. It asks an
//! external bootstrapper to make sure the objects a service needs exist in a
//! given store, and only cares about the boolean answer.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Kind of persistent store a service keeps objects in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Tables in the relational store.
    Relational,
    /// Collections in the document store.
    Document,
}

impl StoreKind {
    /// Stable lowercase name, as passed to external tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Relational => "relational",
            StoreKind::Document => "document",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ensures the tables/collections a service requires exist.
#[async_trait]
pub trait SchemaBootstrapper: Send + Sync {
    /// Returns `true` once the required objects exist.
    async fn ensure(&self, service: &str, store: StoreKind) -> RuntimeResult<bool>;
}

/// Bootstrapper that shells out to an external tool.
///
/// Invoked as `<program> <args..> --service <id> --store <kind>`; exit code 0
/// means the objects exist (possibly after the tool initialised them).
#[derive(Debug, Clone)]
pub struct CommandBootstrapper {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBootstrapper {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl SchemaBootstrapper for CommandBootstrapper {
    async fn ensure(&self, service: &str, store: StoreKind) -> RuntimeResult<bool> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .args(["--service", service, "--store", store.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::Timeout {
                command: self.program.clone(),
                secs: self.timeout.as_secs(),
            })??;

        if output.status.success() {
            info!(service = %service, store = %store, "schema bootstrap verified");
            Ok(true)
        } else {
            warn!(
                service = %service,
                store = %store,
                code = output.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "schema bootstrap reported failure"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_names() {
        assert_eq!(StoreKind::Relational.as_str(), "relational");
        assert_eq!(StoreKind::Document.to_string(), "document");
    }

    #[tokio::test]
    async fn test_command_bootstrapper_success_and_failure() {
        let ok = CommandBootstrapper::new("true", vec![], Duration::from_secs(10));
        assert!(ok
            .ensure("chat-service", StoreKind::Relational)
            .await
            .expect("run true"));

        let failing = CommandBootstrapper::new("false", vec![], Duration::from_secs(10));
        assert!(!failing
            .ensure("chat-service", StoreKind::Document)
            .await
            .expect("run false"));
    }
}
