//! Deployment attempts and the probe results recorded against them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{DeployError, Result};

/// Lifecycle of one deployment attempt.
///
/// ```text
/// pending -> healthy -> remediated      (remediation attempt came up)
/// pending -> unhealthy -> remediated    (failed attempt, fixed by remediation)
///                      -> failed        (remediation exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Healthy,
    Unhealthy,
    Remediated,
    Failed,
}

impl AttemptOutcome {
    pub fn can_transition_to(self, next: AttemptOutcome) -> bool {
        use AttemptOutcome::*;
        matches!(
            (self, next),
            (Pending, Healthy)
                | (Pending, Unhealthy)
                | (Healthy, Remediated)
                | (Unhealthy, Remediated)
                | (Unhealthy, Failed)
        )
    }

    /// Whether verification of the attempt is over.
    ///
    /// `Healthy` counts as terminal, but it is not frozen: the single
    /// `Healthy -> Remediated` move relabels the remediation attempt once the
    /// remediation engine closes the cycle. `Remediated` and `Failed` never
    /// change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptOutcome::Healthy | AttemptOutcome::Remediated | AttemptOutcome::Failed
        )
    }
}

/// One poll cycle of the health verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbeResult {
    /// 1-based cycle number within the verification.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    /// Instance was running and the endpoint answered at all.
    pub reachable: bool,
    /// Endpoint answered 2xx.
    pub http_ok: bool,
    pub raw_body: Option<String>,
    /// Transport error, if any.
    pub error: Option<String>,
}

impl HealthProbeResult {
    /// Cycle where the instance was not running, so nothing was probed.
    pub fn not_running(attempt: u32) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            reachable: false,
            http_ok: false,
            raw_body: None,
            error: Some("instance not running".to_string()),
        }
    }
}

/// Append-only record of one deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: Uuid,
    pub service_id: String,
    /// 1 for the initial deployment, 2 for the remediation redeploy.
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub instance_id: Option<String>,
    pub outcome: AttemptOutcome,
    pub probes: Vec<HealthProbeResult>,
}

impl DeploymentAttempt {
    pub fn new(service_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id: service_id.into(),
            sequence,
            started_at: Utc::now(),
            finished_at: None,
            instance_id: None,
            outcome: AttemptOutcome::Pending,
            probes: Vec::new(),
        }
    }

    pub fn record_probe(&mut self, result: HealthProbeResult) {
        self.probes.push(result);
    }

    /// The most recent probe decides the current disposition.
    pub fn last_probe(&self) -> Option<&HealthProbeResult> {
        self.probes.last()
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: AttemptOutcome) -> Result<()> {
        if !self.outcome.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.outcome,
                to: next,
            });
        }
        self.outcome = next;
        if next.is_terminal() || next == AttemptOutcome::Unhealthy {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_attempt_is_pending() {
        let attempt = DeploymentAttempt::new("chat-service", 1);
        assert_eq!(attempt.outcome, AttemptOutcome::Pending);
        assert!(attempt.probes.is_empty());
        assert!(attempt.finished_at.is_none());
    }

    #[test]
    fn test_valid_transitions() {
        let mut attempt = DeploymentAttempt::new("chat-service", 1);
        attempt.transition(AttemptOutcome::Unhealthy).expect("pending -> unhealthy");
        attempt.transition(AttemptOutcome::Failed).expect("unhealthy -> failed");
        assert!(attempt.outcome.is_terminal());
        assert!(attempt.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut attempt = DeploymentAttempt::new("chat-service", 1);
        attempt.transition(AttemptOutcome::Unhealthy).unwrap();
        attempt.transition(AttemptOutcome::Failed).unwrap();

        let err = attempt
            .transition(AttemptOutcome::Healthy)
            .expect_err("failed is terminal");
        assert!(matches!(err, DeployError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pending_cannot_skip_to_failed() {
        assert!(!AttemptOutcome::Pending.can_transition_to(AttemptOutcome::Failed));
        assert!(!AttemptOutcome::Pending.can_transition_to(AttemptOutcome::Remediated));
        assert!(AttemptOutcome::Healthy.can_transition_to(AttemptOutcome::Remediated));
    }

    #[test]
    fn test_healthy_only_moves_to_remediated() {
        use AttemptOutcome::*;
        let all = [Pending, Healthy, Unhealthy, Remediated, Failed];

        let from_healthy: Vec<_> = all
            .into_iter()
            .filter(|next| Healthy.can_transition_to(*next))
            .collect();
        assert_eq!(from_healthy, vec![Remediated]);
        for closed in [Remediated, Failed] {
            assert!(all.into_iter().all(|next| !closed.can_transition_to(next)));
        }

        let mut attempt = DeploymentAttempt::new("chat-service", 2);
        attempt.transition(Healthy).unwrap();
        assert!(attempt.outcome.is_terminal());
        attempt.transition(Remediated).expect("remediation closes the cycle");
        assert!(attempt.transition(Healthy).is_err());
        assert!(attempt.finished_at.is_some());
    }

    #[test]
    fn test_last_probe_is_most_recent() {
        let mut attempt = DeploymentAttempt::new("chat-service", 1);
        attempt.record_probe(HealthProbeResult::not_running(1));
        let mut second = HealthProbeResult::not_running(2);
        second.reachable = true;
        attempt.record_probe(second);
        assert_eq!(attempt.last_probe().map(|p| p.attempt), Some(2));
    }
}
