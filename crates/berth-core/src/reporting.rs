//! Human-readable rendering of reports and pipeline results.
//!
//! Pure functions over already-collected values; nothing here talks to the
//! runtime.

use std::fmt::Write;

use crate::domain::{DeploymentAttempt, DiagnosticReport};
use crate::pipeline::{DeploymentRun, PipelineFailure};

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn ok_fail(value: Option<&bool>) -> &'static str {
    match value {
        Some(true) => "ok",
        Some(false) => "FAIL",
        None => "-",
    }
}

/// Render a diagnostic report as indented plain text.
pub fn render_report(report: &DiagnosticReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Diagnostic report for {} (collected {})",
        report.service_id,
        report.collected_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "  instance running : {}", yes_no(report.container_running));
    let _ = writeln!(out, "  expected network : {}", report.expected_network);
    let attached = if report.network_membership.is_empty() {
        "(none)".to_string()
    } else {
        report
            .network_membership
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let _ = writeln!(out, "  attached networks: {attached}");

    let mut dependencies: Vec<&String> = report
        .dns_resolution
        .keys()
        .chain(report.port_reachable.keys())
        .collect();
    dependencies.sort();
    dependencies.dedup();
    if !dependencies.is_empty() {
        out.push_str("  dependencies:\n");
        let width = dependencies.iter().map(|d| d.len()).max().unwrap_or(0);
        for dep in dependencies {
            let _ = writeln!(
                out,
                "    {dep:<width$}  dns: {:<4}  port: {}",
                ok_fail(report.dns_resolution.get(dep)),
                ok_fail(report.port_reachable.get(dep)),
            );
        }
    }

    let findings = report.findings();
    if !findings.is_empty() {
        out.push_str("  findings:\n");
        for finding in findings {
            let _ = writeln!(out, "    - {finding}");
        }
    }

    if !report.env_snapshot.is_empty() {
        out.push_str("  environment (secrets removed):\n");
        for (key, value) in &report.env_snapshot {
            let _ = writeln!(out, "    {key}={value}");
        }
    }

    if report.log_tail.is_empty() {
        out.push_str("  log tail: (empty)\n");
    } else {
        let _ = writeln!(out, "  log tail ({} lines):", report.log_tail.len());
        for line in &report.log_tail {
            let _ = writeln!(out, "    | {line}");
        }
    }
    out
}

/// One line per probe of an attempt.
pub fn render_attempt(attempt: &DeploymentAttempt) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "attempt {} of {} [{}]: {:?}",
        attempt.sequence,
        attempt.service_id,
        attempt.instance_id.as_deref().unwrap_or("no instance"),
        attempt.outcome
    );
    for probe in &attempt.probes {
        let status = if probe.http_ok {
            "healthy"
        } else if probe.reachable {
            "unhealthy"
        } else {
            "unreachable"
        };
        let _ = write!(
            out,
            "  #{} {} {}",
            probe.attempt,
            probe.timestamp.format("%H:%M:%S"),
            status
        );
        if let Some(error) = &probe.error {
            let _ = write!(out, " ({error})");
        }
        out.push('\n');
    }
    out
}

/// Summary of a successful run.
pub fn render_run(run: &DeploymentRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: {:?}", run.service_id, run.outcome);
    for attempt in &run.attempts {
        out.push_str(&render_attempt(attempt));
    }
    if let Some(report) = &run.report {
        out.push_str(&render_report(report));
    }
    out
}

/// Stage, service, error and (for verification failures) the full report.
pub fn render_failure(failure: &PipelineFailure) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "deployment failed");
    let _ = writeln!(out, "  stage  : {}", failure.stage);
    let _ = writeln!(out, "  service: {}", failure.service_id);
    let _ = writeln!(out, "  error  : {}", failure.error);
    if let Some(cause) = failure.error.cause() {
        let _ = writeln!(out, "  cause  : {cause}");
    }
    for attempt in &failure.attempts {
        out.push_str(&render_attempt(attempt));
    }
    if let Some(report) = failure.report() {
        out.push_str(&render_report(report));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeployError, HealthProbeResult, Stage};

    fn report() -> DiagnosticReport {
        let mut report = DiagnosticReport::empty("chat-service", "letzgo-network");
        report.container_running = true;
        report.network_membership.insert("bridge".to_string());
        report.dns_resolution.insert("postgres".to_string(), true);
        report.dns_resolution.insert("mongodb".to_string(), false);
        report.port_reachable.insert("postgres".to_string(), true);
        report.port_reachable.insert("mongodb".to_string(), false);
        report.log_tail = vec!["listening on 3002".to_string()];
        report
            .env_snapshot
            .insert("NODE_ENV".to_string(), "staging".to_string());
        report
    }

    #[test]
    fn test_render_report_sections() {
        let text = render_report(&report());
        assert!(text.starts_with("Diagnostic report for chat-service"));
        assert!(text.contains("attached networks: bridge"));
        assert!(text.contains("mongodb   dns: FAIL  port: FAIL"));
        assert!(text.contains("postgres  dns: ok    port: ok"));
        assert!(text.contains("- instance is attached to [bridge] instead of letzgo-network"));
        assert!(text.contains("NODE_ENV=staging"));
        assert!(text.contains("| listening on 3002"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let r = report();
        assert_eq!(render_report(&r), render_report(&r));
    }

    #[test]
    fn test_render_failure_includes_report() {
        let mut attempt = DeploymentAttempt::new("chat-service", 2);
        attempt.record_probe(HealthProbeResult::not_running(1));
        let failure = PipelineFailure {
            stage: Stage::Remediate,
            service_id: "chat-service".to_string(),
            error: DeployError::RemediationExhausted {
                service: "chat-service".to_string(),
                report: Box::new(report()),
                cause: Some("runtime rejected start of chat-service: port taken".to_string()),
            },
            attempts: vec![attempt],
        };

        let text = render_failure(&failure);
        assert!(text.contains("stage  : remediate"));
        assert!(text.contains("cause  : runtime rejected start of chat-service: port taken"));
        assert!(text.contains("service: chat-service"));
        assert!(text.contains("#1"));
        assert!(text.contains("instance not running"));
        assert!(text.contains("Diagnostic report for chat-service"));
    }

    #[test]
    fn test_render_failure_without_report() {
        let failure = PipelineFailure {
            stage: Stage::Network,
            service_id: "chat-service".to_string(),
            error: DeployError::InfrastructureNotFound {
                reference: "letzgo-postgres".to_string(),
            },
            attempts: Vec::new(),
        };
        let text = render_failure(&failure);
        assert!(text.contains("stage  : network"));
        assert!(!text.contains("Diagnostic report"));
    }
}
