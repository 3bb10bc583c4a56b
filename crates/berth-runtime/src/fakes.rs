//! In-memory fakes for the runtime boundary (testing only)
//!
//! Provides `MemoryRuntime`, `ScriptedProbe`, and `StaticBootstrapper`
//! that satisfy the trait contracts without a container engine or network.
//! Every call is recorded so tests can assert on exact interaction counts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::bootstrap::{SchemaBootstrapper, StoreKind};
use crate::error::{RuntimeError, RuntimeResult};
use crate::probe::{HealthProbe, ProbeResponse};
use crate::runtime::{ContainerRuntime, ExecOutput, InstanceState, LaunchSpec};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryRuntime
// ---------------------------------------------------------------------------

/// One recorded runtime interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Inspect(String),
    ListInstances,
    NetworkExists(String),
    CreateNetwork(String),
    LoadImage(PathBuf),
    ImageExists(String),
    Stop(String),
    Remove(String),
    Start(String),
    Exec(String, Vec<String>),
    Logs(String),
}

#[derive(Debug)]
struct FakeState {
    instances: BTreeMap<String, InstanceState>,
    networks: BTreeSet<String>,
    images: BTreeSet<String>,
    archive_images: Vec<String>,
    keep_loaded_images: bool,
    start_failures: u32,
    start_running: bool,
    failing_exec: Vec<String>,
    logs: BTreeMap<String, Vec<String>>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            instances: BTreeMap::new(),
            networks: BTreeSet::new(),
            images: BTreeSet::new(),
            archive_images: Vec::new(),
            keep_loaded_images: true,
            start_failures: 0,
            start_running: true,
            failing_exec: Vec::new(),
            logs: BTreeMap::new(),
            calls: Vec::new(),
            next_id: 1,
        }
    }
}

/// In-memory container runtime.
///
/// Behaves like a real engine where it matters to the orchestrator: names
/// are unique, a published port can only be bound by one running instance,
/// `stop`/`remove` of an absent instance fail with `NotFound`, and `exec`
/// into a stopped instance fails.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<FakeState>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing network.
    pub fn with_network(self, network: &str) -> Self {
        lock(&self.state).networks.insert(network.to_string());
        self
    }

    /// Register a running infrastructure instance attached to `network`.
    pub fn with_running(self, name: &str, network: &str, port: u16) -> Self {
        {
            let mut state = lock(&self.state);
            state.networks.insert(network.to_string());
            let id = format!("fake-{}", state.next_id);
            state.next_id += 1;
            state.instances.insert(
                name.to_string(),
                InstanceState {
                    name: name.to_string(),
                    id,
                    image: format!("{name}:latest"),
                    running: true,
                    status: "running".to_string(),
                    networks: BTreeSet::from([network.to_string()]),
                    ports: BTreeSet::from([port]),
                    env: BTreeMap::new(),
                },
            );
        }
        self
    }

    /// Insert or replace an instance verbatim.
    pub fn put_instance(&self, instance: InstanceState) {
        lock(&self.state)
            .instances
            .insert(instance.name.clone(), instance);
    }

    /// Register a locally present image.
    pub fn put_image(&self, image: &str) {
        lock(&self.state).images.insert(image.to_string());
    }

    /// Images reported by every subsequent `load_image`.
    pub fn set_archive_images(&self, images: Vec<String>) {
        lock(&self.state).archive_images = images;
    }

    /// Make `load_image` succeed without the images actually appearing.
    pub fn discard_loaded_images(&self) {
        lock(&self.state).keep_loaded_images = false;
    }

    /// Reject the next `count` start requests.
    pub fn fail_next_starts(&self, count: u32) {
        lock(&self.state).start_failures = count;
    }

    /// Whether newly started instances come up running (default) or exit at once.
    pub fn set_start_running(&self, running: bool) {
        lock(&self.state).start_running = running;
    }

    /// Flip the run state of an existing instance.
    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(instance) = lock(&self.state).instances.get_mut(name) {
            instance.running = running;
            instance.status = if running { "running" } else { "exited" }.to_string();
        }
    }

    /// `exec` commands containing `needle` exit with status 1.
    pub fn fail_exec_matching(&self, needle: &str) {
        lock(&self.state).failing_exec.push(needle.to_string());
    }

    /// Log lines returned for an instance.
    pub fn set_logs(&self, name: &str, lines: Vec<String>) {
        lock(&self.state).logs.insert(name.to_string(), lines);
    }

    /// Snapshot of an instance.
    pub fn instance(&self, name: &str) -> Option<InstanceState> {
        lock(&self.state).instances.get(name).cloned()
    }

    /// Whether a network exists.
    pub fn has_network(&self, network: &str) -> bool {
        lock(&self.state).networks.contains(network)
    }

    /// Whether an image exists.
    pub fn has_image(&self, image: &str) -> bool {
        lock(&self.state).images.contains(image)
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of start requests made for `name`.
    pub fn starts_for(&self, name: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Start(n) if n == name))
            .count()
    }

    /// Number of running instances publishing `port`.
    pub fn running_on_port(&self, port: u16) -> usize {
        lock(&self.state)
            .instances
            .values()
            .filter(|i| i.running && i.ports.contains(&port))
            .count()
    }

    fn record(&self, call: RuntimeCall) -> MutexGuard<'_, FakeState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn inspect(&self, name: &str) -> RuntimeResult<Option<InstanceState>> {
        let state = self.record(RuntimeCall::Inspect(name.to_string()));
        Ok(state.instances.get(name).cloned())
    }

    async fn list_instances(&self) -> RuntimeResult<Vec<InstanceState>> {
        let state = self.record(RuntimeCall::ListInstances);
        Ok(state.instances.values().cloned().collect())
    }

    async fn network_exists(&self, network: &str) -> RuntimeResult<bool> {
        let state = self.record(RuntimeCall::NetworkExists(network.to_string()));
        Ok(state.networks.contains(network))
    }

    async fn create_network(&self, network: &str) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::CreateNetwork(network.to_string()));
        state.networks.insert(network.to_string());
        Ok(())
    }

    async fn load_image(&self, archive: &Path) -> RuntimeResult<Vec<String>> {
        let mut state = self.record(RuntimeCall::LoadImage(archive.to_path_buf()));
        if state.archive_images.is_empty() {
            return Err(RuntimeError::Parse(
                "`load` reported no images".to_string(),
            ));
        }
        let images = state.archive_images.clone();
        if state.keep_loaded_images {
            state.images.extend(images.iter().cloned());
        }
        Ok(images)
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        let state = self.record(RuntimeCall::ImageExists(image.to_string()));
        Ok(state.images.contains(image))
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::Stop(name.to_string()));
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name}")))?;
        instance.running = false;
        instance.status = "exited".to_string();
        Ok(())
    }

    async fn remove(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::Remove(name.to_string()));
        state
            .instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name}")))
    }

    async fn start(&self, spec: &LaunchSpec) -> RuntimeResult<String> {
        let mut state = self.record(RuntimeCall::Start(spec.name.clone()));
        spec.env_file_contents()?;

        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(RuntimeError::CommandFailed {
                command: "run".to_string(),
                code: 125,
                stderr: format!("failed to start {}", spec.name),
            });
        }
        if state.instances.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if state
            .instances
            .values()
            .any(|i| i.running && i.ports.contains(&spec.port))
        {
            return Err(RuntimeError::Conflict(format!(
                "port {} is already allocated",
                spec.port
            )));
        }
        if !state.networks.contains(&spec.network) {
            return Err(RuntimeError::NotFound(format!(
                "network {} not found",
                spec.network
            )));
        }

        let id = format!("fake-{}", state.next_id);
        state.next_id += 1;
        let running = state.start_running;
        state.instances.insert(
            spec.name.clone(),
            InstanceState {
                name: spec.name.clone(),
                id: id.clone(),
                image: spec.image.clone(),
                running,
                status: if running { "running" } else { "exited" }.to_string(),
                networks: BTreeSet::from([spec.network.clone()]),
                ports: BTreeSet::from([spec.port]),
                env: spec.env.clone(),
            },
        );
        Ok(id)
    }

    async fn exec(&self, name: &str, command: &[String]) -> RuntimeResult<ExecOutput> {
        let state = self.record(RuntimeCall::Exec(name.to_string(), command.to_vec()));
        match state.instances.get(name) {
            Some(instance) if instance.running => {}
            _ => {
                return Err(RuntimeError::NotFound(format!(
                    "container {name} is not running"
                )))
            }
        }

        let joined = command.join(" ");
        let failing = state.failing_exec.iter().any(|n| joined.contains(n.as_str()));
        Ok(ExecOutput {
            exit_code: i32::from(failing),
            stdout: String::new(),
            stderr: if failing {
                format!("{joined}: failed")
            } else {
                String::new()
            },
        })
    }

    async fn logs(&self, name: &str, lines: usize) -> RuntimeResult<Vec<String>> {
        let state = self.record(RuntimeCall::Logs(name.to_string()));
        if !state.instances.contains_key(name) {
            return Err(RuntimeError::NotFound(format!("No such container: {name}")));
        }
        let all = state.logs.get(name).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(lines);
        Ok(all.into_iter().skip(skip).collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProbeLog {
    urls: Vec<String>,
    instants: Vec<tokio::time::Instant>,
}

/// Health probe that answers from a fixed script.
///
/// Call `n` (1-based) answers `outcomes[n-1]`; calls past the end of the
/// script answer `fallback`. Failures are a 503 unless
/// [`ScriptedProbe::unreachable`] is set.
#[derive(Debug)]
pub struct ScriptedProbe {
    outcomes: Vec<bool>,
    fallback: bool,
    failure_status: Option<u16>,
    log: Mutex<ProbeLog>,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<bool>, fallback: bool) -> Self {
        Self {
            outcomes,
            fallback,
            failure_status: Some(503),
            log: Mutex::new(ProbeLog::default()),
        }
    }

    /// Fails calls `1..k` and succeeds from call `k` on.
    pub fn succeeding_on(k: u32) -> Self {
        let failures = k.saturating_sub(1) as usize;
        Self::new(vec![false; failures], true)
    }

    /// Never succeeds.
    pub fn always_failing() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Report failures as connection errors instead of HTTP 503.
    pub fn unreachable(mut self) -> Self {
        self.failure_status = None;
        self
    }

    /// Number of probes issued so far.
    pub fn calls(&self) -> usize {
        lock(&self.log).urls.len()
    }

    /// URLs probed, in order.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.log).urls.clone()
    }

    /// Tokio clock reading at each probe.
    pub fn instants(&self) -> Vec<tokio::time::Instant> {
        lock(&self.log).instants.clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> RuntimeResult<ProbeResponse> {
        let call = {
            let mut log = lock(&self.log);
            log.urls.push(url.to_string());
            log.instants.push(tokio::time::Instant::now());
            log.urls.len()
        };

        let healthy = self
            .outcomes
            .get(call - 1)
            .copied()
            .unwrap_or(self.fallback);
        if healthy {
            return Ok(ProbeResponse {
                status: 200,
                body: Some(r#"{"status":"ok"}"#.to_string()),
            });
        }
        match self.failure_status {
            Some(status) => Ok(ProbeResponse { status, body: None }),
            None => Err(RuntimeError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticBootstrapper
// ---------------------------------------------------------------------------

/// Bootstrapper with a fixed answer that records what it was asked.
#[derive(Debug)]
pub struct StaticBootstrapper {
    answer: bool,
    calls: Mutex<Vec<(String, StoreKind)>>,
}

impl StaticBootstrapper {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, StoreKind)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl SchemaBootstrapper for StaticBootstrapper {
    async fn ensure(&self, service: &str, store: StoreKind) -> RuntimeResult<bool> {
        lock(&self.calls).push((service.to_string(), store));
        Ok(self.answer)
    }
}
