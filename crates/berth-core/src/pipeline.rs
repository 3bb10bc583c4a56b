//! The deployment-and-recovery pipeline.
//!
//! ```text
//! registry -> network -> environment -> bootstrap -> artifact -> deploy -> verify
//!                                                                   |        |
//!                                                          start failed   unhealthy
//!                                                                   v        v
//!                                                               diagnose -> remediate (once)
//! ```
//!
//! Resolver, bootstrap and artifact errors abort immediately. A failed
//! start or verification always leads to exactly one diagnostic report and
//! one remediation cycle. Every finished attempt is written to the journal.

use std::path::PathBuf;
use std::sync::Arc;

use berth_runtime::{ContainerRuntime, HealthProbe, SchemaBootstrapper};
use serde::Serialize;
use tracing::{info, warn, Instrument};

use crate::artifact::ArtifactLoader;
use crate::config::Fleet;
use crate::diagnostics::DiagnosticCollector;
use crate::domain::{
    AttemptOutcome, DeployError, DeploymentAttempt, DiagnosticReport, Result, Stage,
};
use crate::environment::{EnvOverrides, EnvironmentResolver, ResolvedEnvironment, SecretSource};
use crate::executor::DeploymentExecutor;
use crate::health::HealthVerifier;
use crate::journal::AttemptJournal;
use crate::network::{NetworkContext, NetworkResolver};
use crate::obs::{deploy_span, emit_deploy_started, emit_stage_failed};
use crate::polling::Shutdown;
use crate::redact::Redactor;
use crate::registry::ServiceDescriptor;
use crate::remediation::RemediationEngine;

/// External collaborators the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn HealthProbe>,
    /// `None` skips schema bootstrap entirely.
    pub bootstrapper: Option<Arc<dyn SchemaBootstrapper>>,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Image archive to install before deploying.
    pub artifact: Option<PathBuf>,
    pub skip_bootstrap: bool,
}

/// A pipeline run that ended with a healthy instance.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRun {
    pub service_id: String,
    /// `Healthy` or `Remediated`.
    pub outcome: AttemptOutcome,
    /// Initial attempt, plus the remediation attempt if there was one.
    pub attempts: Vec<DeploymentAttempt>,
    /// Present when remediation was needed.
    pub report: Option<DiagnosticReport>,
}

/// A pipeline run that ended in a fatal error.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed for {service_id}: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    pub service_id: String,
    #[source]
    pub error: DeployError,
    pub attempts: Vec<DeploymentAttempt>,
}

impl PipelineFailure {
    fn new(stage: Stage, service_id: &str, error: DeployError) -> Self {
        Self {
            stage,
            service_id: service_id.to_string(),
            error,
            attempts: Vec::new(),
        }
    }

    /// The diagnostic report, for verification failures.
    pub fn report(&self) -> Option<&DiagnosticReport> {
        self.error.report()
    }
}

/// Wraps errors of one stage, keeping the error's own stage when it has one.
trait AtStage<T> {
    fn at(self, stage: Stage, service_id: &str) -> std::result::Result<T, PipelineFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage, service_id: &str) -> std::result::Result<T, PipelineFailure> {
        self.map_err(|error| {
            let stage = error.stage().unwrap_or(stage);
            emit_stage_failed(service_id, stage, &error);
            PipelineFailure::new(stage, service_id, error)
        })
    }
}

#[derive(Clone)]
pub struct DeploymentPipeline {
    fleet: Arc<Fleet>,
    secrets: SecretSource,
    runtime: Arc<dyn ContainerRuntime>,
    bootstrapper: Option<Arc<dyn SchemaBootstrapper>>,
    redactor: Redactor,
    network: NetworkResolver,
    artifacts: ArtifactLoader,
    executor: DeploymentExecutor,
    verifier: HealthVerifier,
    collector: DiagnosticCollector,
    remediation: RemediationEngine,
    journal: Option<AttemptJournal>,
    shutdown: Shutdown,
}

impl DeploymentPipeline {
    pub fn new(
        fleet: Arc<Fleet>,
        collaborators: Collaborators,
        secrets: SecretSource,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let settings = &fleet.settings;
        let Collaborators {
            runtime,
            probe,
            bootstrapper,
        } = collaborators;

        let redactor = Redactor::new(&settings.deploy.secret_key_pattern)?;
        let network = NetworkResolver::new(runtime.clone(), settings.network.clone());
        let executor = DeploymentExecutor::new(runtime.clone(), settings.deploy.clone());
        let verifier = HealthVerifier::new(
            runtime.clone(),
            probe,
            settings.health.clone(),
            redactor.clone(),
        )
        .with_shutdown(shutdown.clone());
        let collector = DiagnosticCollector::new(
            runtime.clone(),
            redactor.clone(),
            settings.deploy.log_tail_lines,
        );
        let remediation = RemediationEngine::new(
            fleet.clone(),
            secrets.clone(),
            network.clone(),
            executor.clone(),
            verifier.clone(),
        )
        .with_shutdown(shutdown.clone());

        Ok(Self {
            artifacts: ArtifactLoader::new(runtime.clone()),
            fleet,
            secrets,
            runtime,
            bootstrapper,
            redactor,
            network,
            executor,
            verifier,
            collector,
            remediation,
            journal: None,
            shutdown,
        })
    }

    /// Persist every finished attempt under `journal`.
    pub fn with_journal(mut self, journal: AttemptJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    /// Run the full pipeline for one service.
    pub async fn deploy(
        &self,
        service_id: &str,
        options: &DeployOptions,
    ) -> std::result::Result<DeploymentRun, PipelineFailure> {
        self.deploy_inner(service_id, options)
            .instrument(deploy_span(service_id, 1))
            .await
    }

    async fn deploy_inner(
        &self,
        service_id: &str,
        options: &DeployOptions,
    ) -> std::result::Result<DeploymentRun, PipelineFailure> {
        let service = self.fleet.registry.lookup(service_id).at(Stage::Registry, service_id)?;
        emit_deploy_started(&service.id, service.port);
        let mut attempt = DeploymentAttempt::new(&service.id, 1);

        let network = self.network.resolve().await.at(Stage::Network, service_id)?;
        let env = self.environment(service_id, &network).at(Stage::Environment, service_id)?;

        if options.skip_bootstrap {
            info!(service = %service_id, "schema bootstrap skipped");
        } else {
            self.bootstrap(service).await.at(Stage::Bootstrap, service_id)?;
        }

        if let Some(artifact) = &options.artifact {
            let image = self.fleet.settings.deploy.image_for(service_id);
            self.artifacts
                .install(artifact, &image)
                .await
                .at(Stage::Artifact, service_id)?;
        }

        self.halt_if_cancelled(&attempt, Stage::Deploy)?;
        match self.executor.deploy(service, &network, &env).await {
            Ok(instance_id) => {
                attempt.instance_id = Some(instance_id);
                let policy = self.fleet.settings.health.poll_policy();
                let verdict = self.verifier.verify(service, &mut attempt, policy).await;
                let verdict = self.keep_attempt(verdict, &attempt, Stage::Verify)?;
                if verdict == AttemptOutcome::Healthy {
                    self.journal(&attempt);
                    return Ok(DeploymentRun {
                        service_id: service.id.clone(),
                        outcome: AttemptOutcome::Healthy,
                        attempts: vec![attempt],
                        report: None,
                    });
                }
            }
            Err(err @ DeployError::StartFailed { .. }) => {
                warn!(service = %service_id, error = %err, "instance did not start; diagnosing");
                let marked = self.verifier.fail_unstarted(service, &mut attempt);
                self.keep_attempt(marked, &attempt, Stage::Deploy)?;
                self.halt_if_cancelled(&attempt, Stage::Deploy)?;
            }
            Err(err) => return Err(err).at(Stage::Deploy, service_id),
        }
        self.halt_if_cancelled(&attempt, Stage::Verify)?;

        self.recover(service, attempt, &network).await
    }

    /// Diagnose the unhealthy `attempt` and run the single remediation cycle.
    async fn recover(
        &self,
        service: &ServiceDescriptor,
        mut attempt: DeploymentAttempt,
        network: &NetworkContext,
    ) -> std::result::Result<DeploymentRun, PipelineFailure> {
        let dependencies = self.fleet.registry.dependencies_of(service);
        let report = self.collector.collect(&service.id, network, &dependencies).await;
        self.halt_if_cancelled(&attempt, Stage::Diagnose)?;

        let remediation = self.remediation.remediate(report, &mut attempt).await;
        let remediation = self.keep_attempt(remediation, &attempt, Stage::Remediate)?;

        self.journal(&attempt);
        self.journal(&remediation.attempt);
        let succeeded = remediation.succeeded();
        let attempts = vec![attempt, remediation.attempt];

        if succeeded {
            return Ok(DeploymentRun {
                service_id: service.id.clone(),
                outcome: AttemptOutcome::Remediated,
                attempts,
                report: Some(remediation.report),
            });
        }

        let error = DeployError::RemediationExhausted {
            service: service.id.clone(),
            report: Box::new(remediation.report),
            cause: remediation.error,
        };
        emit_stage_failed(&service.id, Stage::Remediate, &error);
        let mut failure = PipelineFailure::new(Stage::Remediate, &service.id, error);
        failure.attempts = attempts;
        Err(failure)
    }

    /// Fail with `Cancelled` at `stage` once shutdown has fired.
    fn halt_if_cancelled(
        &self,
        attempt: &DeploymentAttempt,
        stage: Stage,
    ) -> std::result::Result<(), PipelineFailure> {
        if self.shutdown.is_triggered() {
            info!(service = %attempt.service_id, stage = %stage, "shutdown requested; halting");
            return self.keep_attempt(Err(DeployError::Cancelled), attempt, stage);
        }
        Ok(())
    }

    /// Attach the in-flight attempt to a failure.
    fn keep_attempt<T>(
        &self,
        result: Result<T>,
        attempt: &DeploymentAttempt,
        stage: Stage,
    ) -> std::result::Result<T, PipelineFailure> {
        result.at(stage, &attempt.service_id).map_err(|mut failure| {
            failure.attempts.push(attempt.clone());
            failure
        })
    }

    fn journal(&self, attempt: &DeploymentAttempt) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(attempt) {
                warn!(
                    service = %attempt.service_id,
                    attempt = %attempt.id,
                    error = %err,
                    "could not journal attempt"
                );
            }
        }
    }

    fn environment(&self, service_id: &str, network: &NetworkContext) -> Result<ResolvedEnvironment> {
        let secrets = self.secrets.load()?;
        EnvironmentResolver::new(&self.fleet).resolve(
            service_id,
            &secrets,
            &EnvOverrides::for_network(network),
        )
    }

    async fn bootstrap(&self, service: &ServiceDescriptor) -> Result<()> {
        let Some(bootstrapper) = &self.bootstrapper else {
            info!(service = %service.id, "no schema bootstrapper configured");
            return Ok(());
        };
        for store in service.stores() {
            let ok = match bootstrapper.ensure(&service.id, store).await {
                Ok(ok) => ok,
                Err(err) => {
                    warn!(service = %service.id, store = %store, error = %err, "bootstrapper error");
                    false
                }
            };
            if !ok {
                return Err(DeployError::BootstrapFailed {
                    service: service.id.clone(),
                    store,
                });
            }
            info!(service = %service.id, store = %store, "schema objects present");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single-stage operations
    // -----------------------------------------------------------------------

    /// Resolve the shared network without deploying anything.
    pub async fn resolve_network(&self) -> Result<NetworkContext> {
        self.network.resolve().await
    }

    /// Resolved environment of a service, secrets removed.
    pub async fn redacted_environment(
        &self,
        service_id: &str,
    ) -> Result<std::collections::BTreeMap<String, String>> {
        let network = self.network.resolve().await?;
        let env = self.environment(service_id, &network)?;
        Ok(self.redactor.snapshot(env.iter()))
    }

    /// Verify the currently running instance of a service.
    ///
    /// Returns the healthy attempt, or `DeployError::VerificationFailed` once
    /// the poll budget is spent. Nothing is redeployed.
    pub async fn verify(&self, service_id: &str) -> Result<DeploymentAttempt> {
        let service = self.fleet.registry.lookup(service_id)?;
        let mut attempt = DeploymentAttempt::new(&service.id, 1);
        attempt.instance_id = self.runtime.inspect(&service.id).await?.map(|i| i.id);
        let policy = self.fleet.settings.health.poll_policy();
        let verdict = self
            .verifier
            .verify(service, &mut attempt, policy)
            .instrument(deploy_span(service_id, 1))
            .await?;
        if verdict != AttemptOutcome::Healthy {
            return Err(DeployError::VerificationFailed {
                service: service.id.clone(),
                attempts: attempt.probes.len() as u32,
            });
        }
        Ok(attempt)
    }

    /// Diagnostic report for a service's current instance.
    ///
    /// Falls back to the configured network name when the network cannot be
    /// resolved, so a report is produced even with infrastructure down.
    pub async fn diagnose(&self, service_id: &str) -> Result<DiagnosticReport> {
        let service = self.fleet.registry.lookup(service_id)?;
        let network = match self.network.resolve().await {
            Ok(network) => network,
            Err(err) => {
                warn!(error = %err, "network resolution failed; diagnosing against configured name");
                NetworkContext {
                    name: self.fleet.settings.network.name.clone(),
                    hosts: Default::default(),
                }
            }
        };
        let dependencies = self.fleet.registry.dependencies_of(service);
        Ok(self.collector.collect(&service.id, &network, &dependencies).await)
    }
}
