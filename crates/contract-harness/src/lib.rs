//! Contract Harness - API contract tests against a live, isolated service
//!
//! Provides a lifecycle coordinator that:
//! - Provisions an isolated docker network per run
//! - Starts the service under test on it under a fixed alias and waits until it is ready
//! - Runs the specification verifier against the service and captures its output
//! - Tears down container and network in reverse order, whatever happened before

pub mod config;
pub mod container;
pub mod coordinator;
pub mod docker;
pub mod error;
pub mod fakes;
pub mod network;
pub mod obs;
pub mod process;
pub mod project;
pub mod readiness;
pub mod telemetry;
pub mod verifier;

// Re-export key types
pub use config::{HarnessConfig, ProbeConfig, ServiceConfig, VerifierConfig};
pub use container::{ContainerLauncher, ContainerRequest, DockerContainerLauncher, ServiceContainer};
pub use coordinator::{LifecycleCoordinator, RunOutcome, RunPhase, RunReport, TeardownReport};
pub use docker::DockerCli;
pub use error::{ContractTestFailure, HarnessError, HarnessResult};
pub use network::{DockerNetworkProvisioner, NetworkProvisioner, TestNetwork};
pub use readiness::{wait_until_ready, HttpReadinessProbe, ReadinessProbe};
pub use telemetry::init_tracing;
pub use verifier::{SpecmaticVerifier, VerificationOutcome, VerificationRequest, Verifier};

#[cfg(test)]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use crate::docker::DockerCli;

    /// Write `script` as an executable stand-in for the docker binary.
    pub fn fake_docker(script: &str) -> (TempDir, DockerCli) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let cli = DockerCli::new(path.to_string_lossy().to_string());
        (dir, cli)
    }
}
