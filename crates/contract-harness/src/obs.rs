//! Structured observability hooks for harness run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for provisioning, verification and teardown events
//!
//! Events are emitted at `info!` level; teardown problems at `warn!`.
//! Use `--json` on the CLI for newline-delimited JSON output.

use tracing::{debug, info, warn};

/// Span tagged with the run_id, for `Instrument::instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("harness.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, image: &str, spec_file: &str) {
    info!(event = "harness.run_started", run_id = %run_id, image = %image, spec_file = %spec_file);
}

/// Emit event: state machine transition.
pub fn emit_phase(phase: &str) {
    debug!(event = "harness.phase", phase = %phase);
}

pub fn emit_network_created(name: &str, driver: &str) {
    info!(event = "harness.network_created", network = %name, driver = %driver);
}

pub fn emit_network_removed(name: &str) {
    info!(event = "harness.network_removed", network = %name);
}

pub fn emit_container_started(name: &str, alias: &str, host_port: Option<u16>) {
    info!(
        event = "harness.container_started",
        container = %name,
        alias = %alias,
        host_port = ?host_port,
    );
}

pub fn emit_container_ready(name: &str, attempts: u32, elapsed_ms: u64) {
    info!(
        event = "harness.container_ready",
        container = %name,
        attempts = attempts,
        elapsed_ms = elapsed_ms,
    );
}

pub fn emit_container_removed(name: &str) {
    info!(event = "harness.container_removed", container = %name);
}

/// Emit event: the verifier command line, credentials already redacted.
pub fn emit_verifier_command(command: &str) {
    info!(event = "harness.verifier_command", command = %command);
}

/// Emit event: raw verifier output.
pub fn emit_verifier_output(exit_code: i32, output: &str) {
    info!(event = "harness.verifier_output", exit_code = exit_code, "verifier output:\n{}", output);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, outcome: &str, duration_ms: u64, teardown_errors: usize) {
    info!(
        event = "harness.run_finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
        teardown_errors = teardown_errors,
    );
}

/// Emit event: a resource could not be torn down (warning level).
pub fn emit_teardown_error(resource: &str, error: &dyn std::fmt::Display) {
    warn!(event = "harness.teardown_error", resource = %resource, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_enters_and_exits() {
        let span = run_span("run-123");
        let guard = span.enter();
        emit_phase("idle");
        drop(guard);
    }

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        emit_run_started("run-123", "img:latest", "products_api.yaml");
        emit_network_created("contract-net-1", "bridge");
        emit_container_started("contract-svc-1", "go-service", Some(49153));
        emit_container_ready("contract-svc-1", 3, 1500);
        emit_verifier_command("docker run --rm");
        emit_verifier_output(0, "All contract tests passed");
        emit_container_removed("contract-svc-1");
        emit_network_removed("contract-net-1");
        emit_teardown_error("network:contract-net-1", &"boom");
        emit_run_finished("run-123", "passed", 42, 1);
    }
}
