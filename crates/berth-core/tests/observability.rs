//! Structured events emitted along the deployment lifecycle.

mod common;

use berth_core::obs::{
    deploy_span, emit_artifact_installed, emit_deploy_started, emit_diagnostics_collected,
    emit_health_verdict, emit_instance_started, emit_network_resolved, emit_remediation_finished,
    emit_stage_failed,
};
use berth_core::{AttemptOutcome, DeployOptions, Stage};
use berth_runtime::fakes::ScriptedProbe;
use common::harness;
use tracing::Instrument;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_deploy_started_logs_service_and_port() {
    emit_deploy_started("chat-service", 3002);
    assert!(logs_contain("deploy.started"));
    assert!(logs_contain("port=3002"));
}

#[traced_test]
#[test]
fn test_emit_network_and_instance_events() {
    emit_network_resolved("letzgo-network", 3);
    emit_instance_started("chat-service", "fake-7", "letzgo-network");
    assert!(logs_contain("network.resolved"));
    assert!(logs_contain("members=3"));
    assert!(logs_contain("instance_id=fake-7"));
}

#[traced_test]
#[test]
fn test_emit_artifact_installed() {
    emit_artifact_installed("chat-service:latest");
    assert!(logs_contain("artifact.installed"));
}

#[traced_test]
#[test]
fn test_warning_events_are_warn_level() {
    emit_diagnostics_collected("chat-service", false, 2);
    emit_stage_failed("chat-service", Stage::Network, &"letzgo-postgres missing");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("diagnostics.collected"));
    assert!(logs_contain("stage=network"));
    assert!(logs_contain("letzgo-postgres missing"));
}

#[traced_test]
#[test]
fn test_verdict_and_remediation_carry_outcome() {
    emit_health_verdict("chat-service", AttemptOutcome::Unhealthy, 5);
    emit_remediation_finished("chat-service", AttemptOutcome::Remediated);
    assert!(logs_contain("outcome=Unhealthy"));
    assert!(logs_contain("outcome=Remediated"));
}

#[traced_test]
#[tokio::test]
async fn test_instrumented_future_carries_span_fields() {
    async { emit_deploy_started("auth-service", 3000) }
        .instrument(deploy_span("auth-service", 1))
        .await;
    assert!(logs_contain("berth.deploy"));
    assert!(logs_contain("attempt=1"));
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn test_pipeline_run_emits_lifecycle() {
    let h = harness(ScriptedProbe::succeeding_on(2));
    h.pipeline
        .deploy("chat-service", &DeployOptions::default())
        .await
        .expect("healthy");

    assert!(logs_contain("deploy.started"));
    assert!(logs_contain("network.resolved"));
    assert!(logs_contain("instance.started"));
    assert!(logs_contain("health.probe"));
    assert!(logs_contain("health.verdict"));
    assert!(logs_contain("outcome=Healthy"));
    assert!(!logs_contain("remediation.finished"));
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn test_secrets_never_reach_logs() {
    let h = harness(ScriptedProbe::always_failing());
    h.runtime.set_logs(
        "chat-service",
        vec![
            "connecting with POSTGRES_PASSWORD=pg-password".to_string(),
            "Authorization: Bearer abc.def.ghi".to_string(),
        ],
    );
    let _ = h
        .pipeline
        .deploy("chat-service", &DeployOptions::default())
        .await;

    assert!(logs_contain("remediation.finished"));
    assert!(!logs_contain("pg-password"));
    assert!(!logs_contain("abc.def.ghi"));
}
