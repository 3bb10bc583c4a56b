//! Single-shot remediation.
//!
//! Consumes the diagnostic report of a failed verification and performs
//! exactly one redeploy-and-reverify cycle with freshly derived network and
//! environment. There is no second round: a remediation that does not come
//! up healthy is terminal and goes to the operator.

use std::sync::Arc;

use tracing::{info, warn, Instrument};

use crate::config::Fleet;
use crate::domain::{AttemptOutcome, DeployError, DeploymentAttempt, DiagnosticReport, Result};
use crate::environment::{EnvOverrides, EnvironmentResolver, SecretSource};
use crate::executor::DeploymentExecutor;
use crate::health::HealthVerifier;
use crate::network::NetworkResolver;
use crate::obs::{deploy_span, emit_remediation_finished};
use crate::polling::Shutdown;

/// Result of the remediation cycle.
#[derive(Debug, Clone)]
pub struct Remediation {
    /// `Remediated` or `Failed`.
    pub outcome: AttemptOutcome,
    /// The redeploy attempt, sequence 2.
    pub attempt: DeploymentAttempt,
    /// The report that triggered remediation.
    pub report: DiagnosticReport,
    /// Why the redeploy could not even be verified, if it got that far.
    pub error: Option<String>,
}

impl Remediation {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Remediated
    }
}

#[derive(Clone)]
pub struct RemediationEngine {
    fleet: Arc<Fleet>,
    secrets: SecretSource,
    network: NetworkResolver,
    executor: DeploymentExecutor,
    verifier: HealthVerifier,
    shutdown: Shutdown,
}

impl RemediationEngine {
    pub fn new(
        fleet: Arc<Fleet>,
        secrets: SecretSource,
        network: NetworkResolver,
        executor: DeploymentExecutor,
        verifier: HealthVerifier,
    ) -> Self {
        Self {
            fleet,
            secrets,
            network,
            executor,
            verifier,
            shutdown: Shutdown::never(),
        }
    }

    /// Refuse to start the corrective cycle once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the one corrective cycle for the service named in `report`.
    ///
    /// `failed` is the unhealthy attempt being remediated; it is moved to
    /// `Remediated` or `Failed` along with the new attempt. Only
    /// cancellation and lifecycle violations are returned as errors; every
    /// other problem makes the outcome `Failed`.
    pub async fn remediate(
        &self,
        report: DiagnosticReport,
        failed: &mut DeploymentAttempt,
    ) -> Result<Remediation> {
        let service_id = report.service_id.clone();
        if self.shutdown.is_triggered() {
            return Err(DeployError::Cancelled);
        }

        for finding in report.findings() {
            info!(service = %service_id, finding = %finding, "diagnostic finding");
        }

        let mut attempt = DeploymentAttempt::new(&service_id, failed.sequence + 1);
        let span = deploy_span(&service_id, attempt.sequence);
        let error = match self
            .redeploy(&service_id, &mut attempt)
            .instrument(span)
            .await
        {
            Ok(()) => None,
            Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
            Err(err) => {
                warn!(service = %service_id, error = %err, "remediation redeploy failed");
                if attempt.outcome == AttemptOutcome::Pending {
                    attempt.transition(AttemptOutcome::Unhealthy)?;
                }
                Some(err.to_string())
            }
        };

        let outcome = if attempt.outcome == AttemptOutcome::Healthy {
            AttemptOutcome::Remediated
        } else {
            AttemptOutcome::Failed
        };
        attempt.transition(outcome)?;
        failed.transition(outcome)?;

        emit_remediation_finished(&service_id, outcome);
        Ok(Remediation {
            outcome,
            attempt,
            report,
            error,
        })
    }

    async fn redeploy(&self, service_id: &str, attempt: &mut DeploymentAttempt) -> Result<()> {
        let service = self.fleet.registry.lookup(service_id)?;

        let network = self.network.resolve().await?;
        let secrets = self.secrets.load()?;
        let env = EnvironmentResolver::new(&self.fleet).resolve(
            service_id,
            &secrets,
            &EnvOverrides::for_network(&network),
        )?;

        match self.executor.deploy(service, &network, &env).await {
            Ok(instance_id) => attempt.instance_id = Some(instance_id),
            Err(err @ DeployError::StartFailed { .. }) => {
                self.verifier.fail_unstarted(service, attempt)?;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        let policy = self.fleet.settings.health.remediation_policy();
        self.verifier.verify(service, attempt, policy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SECRET_KEY_PATTERN;
    use crate::environment::SecretSet;
    use crate::redact::Redactor;
    use berth_runtime::fakes::{MemoryRuntime, ScriptedProbe};

    fn engine(runtime: Arc<MemoryRuntime>, probe: Arc<ScriptedProbe>) -> RemediationEngine {
        let fleet = Arc::new(Fleet::builtin().unwrap());
        let settings = &fleet.settings;
        let secrets = SecretSource::Static(SecretSet::from_pairs([
            ("JWT_SECRET", "jwt"),
            ("POSTGRES_PASSWORD", "pg"),
            ("MONGODB_PASSWORD", "mongo"),
        ]));
        let redactor = Redactor::new(DEFAULT_SECRET_KEY_PATTERN).unwrap();
        RemediationEngine::new(
            fleet.clone(),
            secrets,
            NetworkResolver::new(runtime.clone(), settings.network.clone()),
            DeploymentExecutor::new(runtime.clone(), settings.deploy.clone()),
            HealthVerifier::new(runtime, probe, settings.health.clone(), redactor),
        )
    }

    fn unhealthy_attempt() -> DeploymentAttempt {
        let mut attempt = DeploymentAttempt::new("chat-service", 1);
        attempt.transition(AttemptOutcome::Unhealthy).unwrap();
        attempt
    }

    fn infra() -> MemoryRuntime {
        MemoryRuntime::new()
            .with_running("letzgo-postgres", "letzgo-network", 5432)
            .with_running("letzgo-mongodb", "letzgo-network", 27017)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_remediation() {
        let runtime = Arc::new(infra());
        let probe = Arc::new(ScriptedProbe::succeeding_on(2));
        let mut failed = unhealthy_attempt();
        let report = DiagnosticReport::empty("chat-service", "letzgo-network");

        let result = engine(runtime.clone(), probe.clone())
            .remediate(report, &mut failed)
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(failed.outcome, AttemptOutcome::Remediated);
        assert_eq!(result.attempt.sequence, 2);
        assert_eq!(result.attempt.outcome, AttemptOutcome::Remediated);
        assert_eq!(probe.calls(), 2);
        assert_eq!(runtime.starts_for("chat-service"), 1);

        let env = runtime.instance("chat-service").unwrap().env;
        assert_eq!(env["NETWORK_NAME"], "letzgo-network");
        assert_eq!(env["POSTGRES_HOST"], "letzgo-postgres");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_remediation_uses_shorter_budget() {
        let runtime = Arc::new(infra());
        let probe = Arc::new(ScriptedProbe::always_failing());
        let mut failed = unhealthy_attempt();

        let result = engine(runtime.clone(), probe.clone())
            .remediate(DiagnosticReport::empty("chat-service", "letzgo-network"), &mut failed)
            .await
            .unwrap();

        assert_eq!(result.outcome, AttemptOutcome::Failed);
        assert_eq!(failed.outcome, AttemptOutcome::Failed);
        assert_eq!(probe.calls(), 3);
        assert_eq!(runtime.starts_for("chat-service"), 1);
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_infrastructure_fails_without_deploying() {
        let runtime = Arc::new(MemoryRuntime::new());
        let probe = Arc::new(ScriptedProbe::succeeding_on(1));
        let mut failed = unhealthy_attempt();

        let result = engine(runtime.clone(), probe.clone())
            .remediate(DiagnosticReport::empty("chat-service", "letzgo-network"), &mut failed)
            .await
            .unwrap();

        assert_eq!(result.outcome, AttemptOutcome::Failed);
        assert!(result.error.unwrap().contains("letzgo-postgres"));
        assert_eq!(runtime.starts_for("chat-service"), 0);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_blocks_redeploy() {
        let runtime = Arc::new(infra());
        let probe = Arc::new(ScriptedProbe::succeeding_on(1));
        let (trigger, shutdown) = crate::polling::shutdown_channel();
        trigger.trigger();
        let mut failed = unhealthy_attempt();

        let err = engine(runtime.clone(), probe.clone())
            .with_shutdown(shutdown)
            .remediate(DiagnosticReport::empty("chat-service", "letzgo-network"), &mut failed)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Cancelled));
        assert_eq!(failed.outcome, AttemptOutcome::Unhealthy);
        assert!(runtime.calls().is_empty());
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_failed_outcome() {
        let runtime = Arc::new(infra());
        runtime.fail_next_starts(1);
        let probe = Arc::new(ScriptedProbe::succeeding_on(1));
        let mut failed = unhealthy_attempt();

        let result = engine(runtime, probe.clone())
            .remediate(DiagnosticReport::empty("chat-service", "letzgo-network"), &mut failed)
            .await
            .unwrap();

        assert_eq!(result.outcome, AttemptOutcome::Failed);
        assert_eq!(result.attempt.outcome, AttemptOutcome::Failed);
        assert_eq!(probe.calls(), 0);
    }
}
