//! Health verification of a freshly started instance.
//!
//! Each cycle is atomic: observe the instance, probe, record, decide. The
//! attempt moves `pending -> healthy` on the first 2xx and
//! `pending -> unhealthy` once the cycle budget is spent or the instance is
//! still not running on the final cycle.

use std::sync::Arc;

use berth_runtime::{ContainerRuntime, HealthProbe, RuntimeError};
use chrono::Utc;
use tracing::warn;

use crate::config::HealthConfig;
use crate::domain::{AttemptOutcome, DeployError, DeploymentAttempt, HealthProbeResult, Result};
use crate::obs::{emit_health_probe, emit_health_verdict};
use crate::polling::{PollPolicy, Poller, Shutdown};
use crate::redact::Redactor;
use crate::registry::ServiceDescriptor;

/// Log lines fetched when verification nears exhaustion.
const ESCALATION_TAIL: usize = 20;

/// Cycles before exhaustion that trigger log escalation.
const ESCALATION_WINDOW: u32 = 2;

#[derive(Clone)]
pub struct HealthVerifier {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    redactor: Redactor,
    shutdown: Shutdown,
}

impl HealthVerifier {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
        redactor: Redactor,
    ) -> Self {
        Self {
            runtime,
            probe,
            config,
            redactor,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Poll `service` under `policy`, recording every cycle on `attempt`.
    ///
    /// Returns the verdict (`Healthy` or `Unhealthy`). Fails only on
    /// cancellation or an attempt that is not `Pending`.
    pub async fn verify(
        &self,
        service: &ServiceDescriptor,
        attempt: &mut DeploymentAttempt,
        policy: PollPolicy,
    ) -> Result<AttemptOutcome> {
        let url = self.config.url_for(service.port);
        let mut poller = Poller::new(policy, self.shutdown.clone());

        while let Some(cycle) = poller.next_cycle().await? {
            let running = matches!(
                self.runtime.inspect(&service.id).await,
                Ok(Some(instance)) if instance.running
            );

            let result = if running {
                self.probe_once(&url, cycle.number).await
            } else {
                HealthProbeResult::not_running(cycle.number)
            };
            emit_health_probe(&service.id, cycle.number, result.reachable, result.http_ok);
            let http_ok = result.http_ok;
            attempt.record_probe(result);

            if http_ok {
                return self.conclude(service, attempt, AttemptOutcome::Healthy);
            }
            if !running && cycle.is_final {
                break;
            }
            if cycle.number + ESCALATION_WINDOW > policy.max_attempts {
                self.escalate(service, cycle.number, policy.max_attempts).await;
            }
        }

        self.conclude(service, attempt, AttemptOutcome::Unhealthy)
    }

    /// Mark an attempt whose instance never started as unhealthy.
    pub fn fail_unstarted(
        &self,
        service: &ServiceDescriptor,
        attempt: &mut DeploymentAttempt,
    ) -> Result<AttemptOutcome> {
        self.conclude(service, attempt, AttemptOutcome::Unhealthy)
    }

    async fn probe_once(&self, url: &str, cycle: u32) -> HealthProbeResult {
        let timestamp = Utc::now();
        match self.probe.probe(url).await {
            Ok(response) => {
                let http_ok = response.is_success();
                HealthProbeResult {
                    attempt: cycle,
                    timestamp,
                    reachable: true,
                    http_ok,
                    error: (!http_ok).then(|| format!("HTTP {}", response.status)),
                    raw_body: response.body,
                }
            }
            Err(err) => {
                let error = match err {
                    RuntimeError::ProbeTimeout { .. } => {
                        DeployError::ProbeTimeout { attempt: cycle }.to_string()
                    }
                    other => other.to_string(),
                };
                HealthProbeResult {
                    attempt: cycle,
                    timestamp,
                    reachable: false,
                    http_ok: false,
                    raw_body: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Surface recent logs while there is still time to read them.
    async fn escalate(&self, service: &ServiceDescriptor, cycle: u32, max: u32) {
        match self.runtime.logs(&service.id, ESCALATION_TAIL).await {
            Ok(lines) => {
                let tail: Vec<String> = lines.iter().map(|l| self.redactor.redact_line(l)).collect();
                warn!(
                    service = %service.id,
                    cycle,
                    max,
                    log_tail = ?tail,
                    "health verification nearing exhaustion"
                );
            }
            Err(err) => {
                warn!(service = %service.id, cycle, max, error = %err, "could not fetch logs");
            }
        }
    }

    fn conclude(
        &self,
        service: &ServiceDescriptor,
        attempt: &mut DeploymentAttempt,
        outcome: AttemptOutcome,
    ) -> Result<AttemptOutcome> {
        attempt.transition(outcome)?;
        emit_health_verdict(&service.id, outcome, attempt.probes.len());
        Ok(outcome)
    }
}
