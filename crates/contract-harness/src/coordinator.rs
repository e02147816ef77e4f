//! Contract test run orchestration.
//!
//! A run walks a fixed state machine:
//!
//! ```text
//! Idle → NetworkReady → ContainerStarting → ContainerReady → Verifying → {Passed | Failed} → Cleanup → Done
//! ```
//!
//! Any provisioning failure (or an external cancellation) jumps straight to
//! `Cleanup` with an aborted outcome. Every acquired resource goes onto a
//! stack and is released in reverse order during `Cleanup`, whatever
//! happened before. Teardown errors are collected in a [`TeardownReport`]
//! and never replace the primary outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::container::{ContainerLauncher, ContainerRequest, DockerContainerLauncher, ServiceContainer};
use crate::docker::DockerCli;
use crate::error::{ContractTestFailure, HarnessError, HarnessResult};
use crate::network::{DockerNetworkProvisioner, NetworkProvisioner, TestNetwork};
use crate::obs;
use crate::project::{resolve_project_dir, spec_digest};
use crate::readiness::{wait_until_ready, HttpReadinessProbe, ReadinessProbe};
use crate::verifier::{SpecmaticVerifier, VerificationRequest, Verifier};

/// States of a single run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    NetworkReady,
    ContainerStarting,
    ContainerReady,
    Verifying,
    Passed,
    Failed,
    Cleanup,
    Done,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::NetworkReady => "network_ready",
            RunPhase::ContainerStarting => "container_starting",
            RunPhase::ContainerReady => "container_ready",
            RunPhase::Verifying => "verifying",
            RunPhase::Passed => "passed",
            RunPhase::Failed => "failed",
            RunPhase::Cleanup => "cleanup",
            RunPhase::Done => "done",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The verifier exited 0.
    Passed { output: Vec<u8> },

    /// The verifier ran and failed, or could not be launched.
    Failed(HarnessError),

    /// Setup did not get far enough to verify anything.
    Aborted(HarnessError),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Passed { .. } => "passed",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Aborted(_) => "aborted",
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, RunOutcome::Passed { .. })
    }

    pub fn error(&self) -> Option<&HarnessError> {
        match self {
            RunOutcome::Passed { .. } => None,
            RunOutcome::Failed(e) | RunOutcome::Aborted(e) => Some(e),
        }
    }

    /// Raw verifier output, whether it passed or failed.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            RunOutcome::Passed { output } => Some(output),
            RunOutcome::Failed(HarnessError::VerifierAssertionFailure { output, .. }) => {
                Some(output)
            }
            _ => None,
        }
    }
}

/// What happened while releasing resources.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Resources a teardown was attempted for, in the order attempted.
    pub attempted: Vec<String>,

    /// Errors raised by those attempts.
    pub errors: Vec<HarnessError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, resource: String, result: HarnessResult<()>) {
        if let Err(e) = result {
            obs::emit_teardown_error(&resource, &e);
            self.errors.push(e);
        }
        self.attempted.push(resource);
    }
}

/// Full account of one run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// Every state the run passed through.
    pub phases: Vec<RunPhase>,

    pub outcome: RunOutcome,
    pub teardown: TeardownReport,

    /// Name of the network, once one was reserved.
    pub network: Option<String>,

    /// Name of the container, once one was started.
    pub container: Option<String>,

    /// SHA-256 of the specification file.
    pub spec_digest: Option<String>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_passed()
    }

    /// `Ok(self)` when the run passed, the failure otherwise.
    ///
    /// Teardown errors do not turn a passed run into a failure.
    pub fn into_result(self) -> Result<RunReport, ContractTestFailure> {
        match self.outcome {
            RunOutcome::Passed { .. } => Ok(self),
            RunOutcome::Failed(cause) | RunOutcome::Aborted(cause) => Err(ContractTestFailure {
                run_id: self.run_id,
                cause,
                teardown: self.teardown,
            }),
        }
    }

    /// JSON rendering for report files.
    pub fn to_json(&self) -> Value {
        let error = self.outcome.error().map(|e| {
            json!({
                "kind": e.kind(),
                "message": e.to_string(),
            })
        });

        json!({
            "run_id": &self.run_id,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "duration_ms": self.duration_ms,
            "phases": self.phases.iter().map(RunPhase::as_str).collect::<Vec<_>>(),
            "outcome": {
                "status": self.outcome.label(),
                "output": self.outcome.output().map(String::from_utf8_lossy),
                "error": error,
            },
            "network": &self.network,
            "container": &self.container,
            "spec_digest": &self.spec_digest,
            "teardown": {
                "attempted": &self.teardown.attempted,
                "errors": self.teardown.errors.iter().map(|e| json!({
                    "kind": e.kind(),
                    "message": e.to_string(),
                })).collect::<Vec<_>>(),
            },
        })
    }
}

/// A resource acquired during a run.
enum Acquired {
    Network(TestNetwork),
    Container(ServiceContainer),
    /// A verifier run abandoned before it finished.
    Verifier(VerificationRequest),
}

impl Acquired {
    fn label(&self) -> String {
        match self {
            Acquired::Network(n) => format!("network:{}", n.name),
            Acquired::Container(c) => format!("container:{}", c.name),
            Acquired::Verifier(r) => format!("verifier:{}", r.container_name),
        }
    }
}

/// Acquired resources, released last-in first-out.
///
/// Releasing consumes each entry, so nothing is torn down twice.
#[derive(Default)]
struct ResourceStack {
    resources: Vec<Acquired>,
}

impl ResourceStack {
    fn push(&mut self, resource: Acquired) {
        self.resources.push(resource);
    }

    async fn release_all(
        mut self,
        provisioner: &dyn NetworkProvisioner,
        launcher: &dyn ContainerLauncher,
        verifier: &dyn Verifier,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        while let Some(resource) = self.resources.pop() {
            let label = resource.label();
            let result = match resource {
                Acquired::Verifier(request) => verifier.abort(&request).await,
                Acquired::Container(container) => {
                    let name = container.name.clone();
                    let result = launcher.terminate(Some(container)).await;
                    if result.is_ok() {
                        obs::emit_container_removed(&name);
                    }
                    result
                }
                Acquired::Network(network) => {
                    let name = network.name.clone();
                    let result = provisioner.destroy(network).await;
                    if result.is_ok() {
                        obs::emit_network_removed(&name);
                    }
                    result
                }
            };
            report.record(label, result);
        }

        report
    }
}

/// Mutable bookkeeping for one run in flight.
#[derive(Default)]
struct RunTracker {
    phases: Vec<RunPhase>,
    resources: ResourceStack,
    network: Option<String>,
    container: Option<String>,
    spec_digest: Option<String>,
}

impl RunTracker {
    fn enter(&mut self, phase: RunPhase) {
        obs::emit_phase(phase.as_str());
        self.phases.push(phase);
    }
}

/// Sequences network, container and verifier for one contract test.
pub struct LifecycleCoordinator {
    provisioner: Arc<dyn NetworkProvisioner>,
    launcher: Arc<dyn ContainerLauncher>,
    probe: Arc<dyn ReadinessProbe>,
    verifier: Arc<dyn Verifier>,
    cancel: CancellationToken,
}

impl LifecycleCoordinator {
    pub fn new(
        provisioner: Arc<dyn NetworkProvisioner>,
        launcher: Arc<dyn ContainerLauncher>,
        probe: Arc<dyn ReadinessProbe>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            provisioner,
            launcher,
            probe,
            verifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Coordinator wired to the docker CLI, an HTTP readiness probe and the
    /// Specmatic verifier.
    pub fn docker(config: &HarnessConfig) -> HarnessResult<Self> {
        let docker = DockerCli::new(config.docker_bin.clone());
        let probe = HttpReadinessProbe::new(
            config.service.readiness_path.clone(),
            config.probe.request_timeout(),
        )?;

        Ok(Self::new(
            Arc::new(DockerNetworkProvisioner::new(docker.clone())),
            Arc::new(DockerContainerLauncher::new(docker)),
            Arc::new(probe),
            Arc::new(SpecmaticVerifier::new(config.docker_bin.clone())),
        ))
    }

    /// Abort runs when `cancel` fires. Teardown still happens.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one contract test and fail unless the verifier passed.
    pub async fn run_contract_test(
        &self,
        config: &HarnessConfig,
    ) -> Result<RunReport, ContractTestFailure> {
        self.execute(config).await.into_result()
    }

    /// Run one contract test and report everything that happened.
    pub async fn execute(&self, config: &HarnessConfig) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.execute_run(run_id, config).instrument(span).await
    }

    async fn execute_run(&self, run_id: String, config: &HarnessConfig) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        obs::emit_run_started(&run_id, &config.service.image, &config.verifier.spec_file);

        let mut run = RunTracker::default();
        run.enter(RunPhase::Idle);

        let outcome = self.provision_and_verify(config, &mut run).await;
        match &outcome {
            RunOutcome::Passed { .. } => run.enter(RunPhase::Passed),
            RunOutcome::Failed(_) => run.enter(RunPhase::Failed),
            RunOutcome::Aborted(_) => {}
        }

        run.enter(RunPhase::Cleanup);
        let resources = std::mem::take(&mut run.resources);
        let teardown = resources
            .release_all(
                self.provisioner.as_ref(),
                self.launcher.as_ref(),
                self.verifier.as_ref(),
            )
            .await;
        run.enter(RunPhase::Done);

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(&run_id, outcome.label(), duration_ms, teardown.errors.len());

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            phases: run.phases,
            outcome,
            teardown,
            network: run.network,
            container: run.container,
            spec_digest: run.spec_digest,
        }
    }

    async fn provision_and_verify(&self, config: &HarnessConfig, run: &mut RunTracker) -> RunOutcome {
        let project_dir = match resolve_project_dir(config.project_dir.as_deref()).await {
            Ok(dir) => dir,
            Err(e) => return RunOutcome::Aborted(e),
        };
        run.spec_digest = spec_digest(&project_dir, &config.verifier.spec_file);

        if let Err(e) = self.check_cancelled("network creation") {
            return RunOutcome::Aborted(e);
        }
        let network = TestNetwork::reserve(&config.network_driver);
        run.network = Some(network.name.clone());
        if let Err(e) = self.provisioner.create(&network).await {
            // A failed create may still leave the network behind.
            run.resources.push(Acquired::Network(network));
            return RunOutcome::Aborted(e);
        }
        obs::emit_network_created(&network.name, &network.driver);
        run.resources.push(Acquired::Network(network.clone()));
        run.enter(RunPhase::NetworkReady);

        if let Err(e) = self.check_cancelled("container start") {
            return RunOutcome::Aborted(e);
        }
        run.enter(RunPhase::ContainerStarting);
        let request = ContainerRequest::from_config(&config.service);
        let container = match self.launcher.create(&request, &network).await {
            Ok(container) => container,
            Err(e) => return RunOutcome::Aborted(e),
        };
        obs::emit_container_started(&container.name, &container.alias, container.host_port);
        run.container = Some(container.name.clone());
        run.resources.push(Acquired::Container(container.clone()));

        let wait_start = Instant::now();
        match wait_until_ready(
            self.probe.as_ref(),
            &container,
            config.service.startup_timeout(),
            &config.probe,
            &self.cancel,
        )
        .await
        {
            Ok(attempts) => obs::emit_container_ready(
                &container.name,
                attempts,
                wait_start.elapsed().as_millis() as u64,
            ),
            Err(e) => return RunOutcome::Aborted(e),
        }
        run.enter(RunPhase::ContainerReady);

        if let Err(e) = self.check_cancelled("verification") {
            return RunOutcome::Aborted(e);
        }
        run.enter(RunPhase::Verifying);
        let request = VerificationRequest {
            base_url: container.network_base_url(),
            project_dir,
            network: network.name.clone(),
            container_name: VerificationRequest::container_name(),
            config: config.verifier.clone(),
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                // The verifier container outlives its killed client.
                run.resources.push(Acquired::Verifier(request.clone()));
                return RunOutcome::Aborted(HarnessError::Cancelled {
                    phase: "verification".to_string(),
                });
            }
            outcome = self.verifier.run(&request) => outcome,
        };

        match outcome.into_result() {
            Ok(output) => RunOutcome::Passed { output },
            Err(e) => RunOutcome::Failed(e),
        }
    }

    fn check_cancelled(&self, phase: &str) -> HarnessResult<()> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::Cancelled {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: RunOutcome, teardown: TeardownReport) -> RunReport {
        RunReport {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 5,
            phases: vec![RunPhase::Idle, RunPhase::Cleanup, RunPhase::Done],
            outcome,
            teardown,
            network: Some("contract-net-1".to_string()),
            container: None,
            spec_digest: None,
        }
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RunPhase::NetworkReady.as_str(), "network_ready");
        assert_eq!(RunPhase::ContainerReady.to_string(), "container_ready");
        assert_eq!(
            serde_json::to_value(RunPhase::Verifying).unwrap(),
            json!("verifying")
        );
    }

    #[test]
    fn test_teardown_report_records_in_order() {
        let mut teardown = TeardownReport::default();
        teardown.record("container:a".to_string(), Ok(()));
        teardown.record(
            "network:b".to_string(),
            Err(HarnessError::NetworkTeardown {
                network: "b".to_string(),
                reason: "busy".to_string(),
            }),
        );
        assert_eq!(teardown.attempted, vec!["container:a", "network:b"]);
        assert_eq!(teardown.errors.len(), 1);
        assert!(!teardown.is_clean());
    }

    #[test]
    fn test_passed_run_stays_passed_despite_teardown_errors() {
        let teardown = TeardownReport {
            attempted: vec!["container:a".to_string()],
            errors: vec![HarnessError::ContainerTeardown {
                container: "a".to_string(),
                reason: "busy".to_string(),
            }],
        };
        let report = report(
            RunOutcome::Passed {
                output: b"All contract tests passed".to_vec(),
            },
            teardown,
        );
        let report = report.into_result().expect("should stay passed");
        assert_eq!(report.teardown.errors.len(), 1);
    }

    #[test]
    fn test_aborted_run_into_result_keeps_cause() {
        let report = report(
            RunOutcome::Aborted(HarnessError::NetworkCreation {
                network: "contract-net-1".to_string(),
                reason: "driver unavailable".to_string(),
            }),
            TeardownReport::default(),
        );
        let failure = report.into_result().expect_err("should fail");
        assert_eq!(failure.run_id, "run-1");
        assert!(matches!(failure.cause, HarnessError::NetworkCreation { .. }));
    }

    #[test]
    fn test_to_json_shape() {
        let report = report(
            RunOutcome::Failed(HarnessError::VerifierAssertionFailure {
                exit_code: 1,
                output: b"Assertion failed".to_vec(),
            }),
            TeardownReport::default(),
        );
        let value = report.to_json();
        assert_eq!(value["outcome"]["status"], "failed");
        assert_eq!(value["outcome"]["output"], "Assertion failed");
        assert_eq!(value["outcome"]["error"]["kind"], "verifier_assertion_failure");
        assert_eq!(value["phases"], json!(["idle", "cleanup", "done"]));
        assert_eq!(value["network"], "contract-net-1");
        assert!(value["container"].is_null());
    }

    #[tokio::test]
    async fn test_cancelled_verification_removes_verifier_before_network() {
        use crate::fakes::{CallLog, FakeReadinessProbe};
        use crate::test_support::fake_docker;
        use std::time::Duration;

        let (dir, docker) = fake_docker(
            r#"echo "$*" >> "$(dirname "$0")/calls.log"
            case "$1 $2" in
                "run --detach") echo 0123456789ab ;;
                "run --rm") exec sleep 30 ;;
                port*) echo 127.0.0.1:49153 ;;
            esac"#,
        );
        let log_path = dir.path().join("calls.log");
        let project = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            project_dir: Some(project.path().to_path_buf()),
            docker_bin: docker.program().to_string(),
            ..HarnessConfig::default()
        };

        let cancel = CancellationToken::new();
        let coordinator = LifecycleCoordinator::new(
            Arc::new(DockerNetworkProvisioner::new(docker.clone())),
            Arc::new(DockerContainerLauncher::new(docker.clone())),
            Arc::new(FakeReadinessProbe::ready(CallLog::new())),
            Arc::new(SpecmaticVerifier::new(docker.program())),
        )
        .with_cancellation(cancel.clone());

        let watched = log_path.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let calls = std::fs::read_to_string(&watched).unwrap_or_default();
                if calls.contains("run --rm") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
        });

        let report = coordinator.execute(&config).await;
        assert!(matches!(
            report.outcome.error(),
            Some(HarnessError::Cancelled { .. })
        ));
        assert!(report.teardown.is_clean());
        assert!(report.teardown.attempted[0].starts_with("verifier:contract-verify-"));

        let calls = std::fs::read_to_string(&log_path).unwrap();
        let position = |prefix: &str| {
            calls
                .lines()
                .position(|line| line.starts_with(prefix))
                .unwrap_or_else(|| panic!("no `{}` call in:\n{}", prefix, calls))
        };
        let verifier_rm = position("rm --force contract-verify-");
        let container_rm = position("rm --force --volumes contract-svc-");
        let network_rm = position("network rm contract-net-");
        assert!(verifier_rm < container_rm);
        assert!(container_rm < network_rm);
    }
}
