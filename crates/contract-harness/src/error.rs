//! Error types for the contract harness

use std::time::Duration;

use thiserror::Error;

use crate::coordinator::TeardownReport;

/// Errors that can occur while provisioning, verifying or tearing down
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The isolated test network could not be created
    #[error("failed to create network {network}: {reason}")]
    NetworkCreation { network: String, reason: String },

    /// The test network could not be removed
    #[error("failed to remove network {network}: {reason}")]
    NetworkTeardown { network: String, reason: String },

    /// The service container could not be created or started
    #[error("failed to start container from image {image}: {reason}")]
    ContainerStart { image: String, reason: String },

    /// The readiness probe never succeeded within the startup timeout
    #[error("service not ready after {timeout:?}: last failure: {last_failure}")]
    ReadinessTimeout {
        timeout: Duration,
        last_failure: String,
    },

    /// The service container could not be stopped or removed
    #[error("failed to terminate container {container}: {reason}")]
    ContainerTeardown { container: String, reason: String },

    /// The verifier process could not be started at all
    #[error("failed to launch verifier {program}: {reason}")]
    VerifierLaunch { program: String, reason: String },

    /// The verifier ran and reported at least one failed assertion.
    /// `output` is the raw combined output.
    #[error("verifier exited with code {exit_code}:\n{}", String::from_utf8_lossy(.output))]
    VerifierAssertionFailure { exit_code: i32, output: Vec<u8> },

    /// The run was aborted from outside before it could finish
    #[error("run cancelled during {phase}")]
    Cancelled { phase: String },

    /// The project root could not be determined
    #[error("failed to resolve project directory: {0}")]
    ProjectRoot(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::NetworkCreation { .. } => "network_creation",
            HarnessError::NetworkTeardown { .. } => "network_teardown",
            HarnessError::ContainerStart { .. } => "container_start",
            HarnessError::ReadinessTimeout { .. } => "readiness_timeout",
            HarnessError::ContainerTeardown { .. } => "container_teardown",
            HarnessError::VerifierLaunch { .. } => "verifier_launch",
            HarnessError::VerifierAssertionFailure { .. } => "verifier_assertion_failure",
            HarnessError::Cancelled { .. } => "cancelled",
            HarnessError::ProjectRoot(_) => "project_root",
            HarnessError::Io(_) => "io",
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Failure of a complete contract test run.
///
/// Carries the primary cause together with whatever went wrong during
/// teardown, so cleanup problems stay visible without replacing the cause.
#[derive(Error, Debug)]
#[error("contract test run {run_id} failed: {cause}")]
pub struct ContractTestFailure {
    pub run_id: String,
    #[source]
    pub cause: HarnessError,
    pub teardown: TeardownReport,
}
