//! Shared fixtures: the built-in fleet on an in-memory runtime with the
//! relational and document stores already running.

#![allow(dead_code)]

use std::sync::Arc;

use berth_core::{
    AttemptJournal, Collaborators, DeploymentPipeline, Fleet, SecretSet, SecretSource, Shutdown,
};
use berth_runtime::fakes::{MemoryRuntime, ScriptedProbe, StaticBootstrapper};
use tempfile::TempDir;

pub struct Harness {
    pub runtime: Arc<MemoryRuntime>,
    pub probe: Arc<ScriptedProbe>,
    pub bootstrapper: Arc<StaticBootstrapper>,
    pub journal: AttemptJournal,
    pub pipeline: DeploymentPipeline,
    _state: TempDir,
}

pub fn secrets() -> SecretSet {
    SecretSet::from_pairs([
        ("JWT_SECRET", "jwt-secret"),
        ("POSTGRES_PASSWORD", "pg-password"),
        ("MONGODB_PASSWORD", "mongo-password"),
        ("REDIS_PASSWORD", "redis-password"),
        ("RABBITMQ_PASSWORD", "rabbit-password"),
    ])
}

pub fn infrastructure() -> MemoryRuntime {
    MemoryRuntime::new()
        .with_running("letzgo-postgres", "letzgo-network", 5432)
        .with_running("letzgo-mongodb", "letzgo-network", 27017)
        .with_running("letzgo-redis", "letzgo-network", 6379)
}

pub fn harness(probe: ScriptedProbe) -> Harness {
    build(infrastructure(), probe, true, secrets(), Shutdown::never())
}

pub fn build(
    runtime: MemoryRuntime,
    probe: ScriptedProbe,
    bootstrap_ok: bool,
    secrets: SecretSet,
    shutdown: Shutdown,
) -> Harness {
    let runtime = Arc::new(runtime);
    let probe = Arc::new(probe);
    let bootstrapper = Arc::new(StaticBootstrapper::new(bootstrap_ok));
    let state = tempfile::tempdir().expect("state dir");
    let journal = AttemptJournal::new(state.path());

    let fleet = Arc::new(Fleet::builtin().expect("builtin fleet"));
    let pipeline = DeploymentPipeline::new(
        fleet,
        Collaborators {
            runtime: runtime.clone(),
            probe: probe.clone(),
            bootstrapper: Some(bootstrapper.clone()),
        },
        SecretSource::Static(secrets),
        shutdown,
    )
    .expect("pipeline")
    .with_journal(journal.clone());

    Harness {
        runtime,
        probe,
        bootstrapper,
        journal,
        pipeline,
        _state: state,
    }
}
