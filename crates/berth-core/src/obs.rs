//! Structured observability hooks for the deployment lifecycle.
//!
//! This module provides:
//! - Deployment-scoped tracing spans via [`deploy_span`]
//! - Emission functions for every stage transition of the pipeline
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use tracing::{info, warn};

use crate::domain::{AttemptOutcome, Stage};

/// Deployment-scoped span. Attach it to the attempt's future with
/// [`tracing::Instrument::instrument`] so every event carries the service
/// and attempt sequence.
///
/// # Example
///
/// ```ignore
/// pipeline.run(service).instrument(deploy_span("chat-service", 1)).await
/// ```
pub fn deploy_span(service: &str, attempt: u32) -> tracing::Span {
    tracing::info_span!("berth.deploy", service = %service, attempt = attempt)
}

/// Emit event: pipeline started for a service.
pub fn emit_deploy_started(service: &str, port: u16) {
    info!(event = "deploy.started", service = %service, port = port);
}

/// Emit event: network resolved with its running member count.
pub fn emit_network_resolved(network: &str, members: usize) {
    info!(event = "network.resolved", network = %network, members = members);
}

/// Emit event: artifact installed into the local runtime.
pub fn emit_artifact_installed(image: &str) {
    info!(event = "artifact.installed", image = %image);
}

/// Emit event: a new instance was started.
pub fn emit_instance_started(service: &str, instance_id: &str, network: &str) {
    info!(
        event = "instance.started",
        service = %service,
        instance_id = %instance_id,
        network = %network,
    );
}

/// Emit event: one health poll cycle finished.
pub fn emit_health_probe(service: &str, cycle: u32, reachable: bool, http_ok: bool) {
    info!(
        event = "health.probe",
        service = %service,
        cycle = cycle,
        reachable = reachable,
        http_ok = http_ok,
    );
}

/// Emit event: health verification reached a verdict.
pub fn emit_health_verdict(service: &str, outcome: AttemptOutcome, probes: usize) {
    info!(
        event = "health.verdict",
        service = %service,
        outcome = ?outcome,
        probes = probes,
    );
}

/// Emit event: diagnostic sweep finished (warning level).
pub fn emit_diagnostics_collected(service: &str, running: bool, findings: usize) {
    warn!(
        event = "diagnostics.collected",
        service = %service,
        running = running,
        findings = findings,
    );
}

/// Emit event: the single remediation cycle finished.
pub fn emit_remediation_finished(service: &str, outcome: AttemptOutcome) {
    info!(event = "remediation.finished", service = %service, outcome = ?outcome);
}

/// Emit event: a pipeline stage failed fatally (warning level).
pub fn emit_stage_failed(service: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", service = %service, stage = %stage, error = %error);
}
