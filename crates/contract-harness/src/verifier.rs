//! Specification verifier invocation.
//!
//! The verifier is an external black box: it reads a specification file and
//! a base URL and answers with an exit code and some text. [`Verifier`] is
//! the seam the coordinator talks to; [`SpecmaticVerifier`] runs the real
//! tool in a throwaway container scoped to the test network.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tracing::debug;
use uuid::Uuid;

use crate::config::{VerifierConfig, ENV_OAUTH_TOKEN, VERIFIER_WORKDIR};
use crate::docker::{is_not_found, DockerCli};
use crate::error::{HarnessError, HarnessResult};
use crate::obs;
use crate::process::{render_command, run_captured};

/// Everything one verifier invocation needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Base URL of the service, as reachable inside the network scope.
    pub base_url: String,

    /// Project directory made available to the verifier.
    pub project_dir: PathBuf,

    /// Network the verifier's own traffic is scoped to.
    pub network: String,

    /// Name given to the verifier's container, so an abandoned run can be
    /// removed.
    pub container_name: String,

    /// Behaviour options, spec file and image.
    pub config: VerifierConfig,
}

impl VerificationRequest {
    /// Generate a fresh, run-unique verifier container name.
    pub fn container_name() -> String {
        format!("contract-verify-{}", Uuid::new_v4().simple())
    }
}

/// Terminal outcome of one verifier invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The process could not be started at all.
    LaunchError { program: String, reason: String },

    /// The process ran to completion. `output` holds the combined
    /// stdout/stderr bytes exactly as written.
    Completed {
        exit_code: i32,
        output: Vec<u8>,
        duration_ms: u64,
    },
}

impl VerificationOutcome {
    /// Whether every contract assertion passed.
    pub fn passed(&self) -> bool {
        matches!(self, VerificationOutcome::Completed { exit_code: 0, .. })
    }

    /// Captured output, if the process ran.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            VerificationOutcome::Completed { output, .. } => Some(output),
            VerificationOutcome::LaunchError { .. } => None,
        }
    }

    /// Convert into the captured output on success, or the matching error.
    pub fn into_result(self) -> HarnessResult<Vec<u8>> {
        match self {
            VerificationOutcome::Completed {
                exit_code: 0,
                output,
                ..
            } => Ok(output),
            VerificationOutcome::Completed {
                exit_code, output, ..
            } => Err(HarnessError::VerifierAssertionFailure { exit_code, output }),
            VerificationOutcome::LaunchError { program, reason } => {
                Err(HarnessError::VerifierLaunch { program, reason })
            }
        }
    }
}

/// Runs the external verifier against a live service.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Run to completion. Never fails; every result is an outcome.
    async fn run(&self, request: &VerificationRequest) -> VerificationOutcome;

    /// Remove whatever an abandoned `run` for `request` left behind.
    async fn abort(&self, _request: &VerificationRequest) -> HarnessResult<()> {
        Ok(())
    }
}

/// Runs the Specmatic verifier image through `docker run`.
#[derive(Debug, Clone)]
pub struct SpecmaticVerifier {
    docker_bin: String,
}

impl Default for SpecmaticVerifier {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl SpecmaticVerifier {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Build the argument list for one invocation.
    ///
    /// Deterministic: the same request always yields the same arguments, and
    /// every behaviour option is passed even when it holds its default.
    pub fn command_args(request: &VerificationRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            request.container_name.clone(),
            "--network".to_string(),
            request.network.clone(),
        ];

        for (key, value) in request.config.env_pairs() {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend([
            "-v".to_string(),
            format!("{}:{}", request.project_dir.display(), VERIFIER_WORKDIR),
            "-w".to_string(),
            VERIFIER_WORKDIR.to_string(),
            request.config.image.clone(),
            "test".to_string(),
            request.config.spec_file.clone(),
            "--testBaseURL".to_string(),
            request.base_url.clone(),
        ]);

        args
    }

    pub fn abort_args(request: &VerificationRequest) -> Vec<String> {
        vec![
            "rm".to_string(),
            "--force".to_string(),
            request.container_name.clone(),
        ]
    }
}

/// Replace the bearer credential in an argument list for logging.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let prefix = format!("{}=", ENV_OAUTH_TOKEN);
    args.iter()
        .map(|arg| match arg.strip_prefix(&prefix) {
            Some(token) if !token.is_empty() => format!("{}***", prefix),
            _ => arg.clone(),
        })
        .collect()
}

#[async_trait]
impl Verifier for SpecmaticVerifier {
    async fn run(&self, request: &VerificationRequest) -> VerificationOutcome {
        let args = Self::command_args(request);
        obs::emit_verifier_command(&render_command(&self.docker_bin, &redact_args(&args)));

        match run_captured(&self.docker_bin, &args).await {
            Ok(captured) => {
                obs::emit_verifier_output(captured.exit_code, &captured.text());
                VerificationOutcome::Completed {
                    exit_code: captured.exit_code,
                    output: captured.output,
                    duration_ms: captured.duration_ms,
                }
            }
            Err(e) => VerificationOutcome::LaunchError {
                program: self.docker_bin.clone(),
                reason: e.to_string(),
            },
        }
    }

    async fn abort(&self, request: &VerificationRequest) -> HarnessResult<()> {
        let docker = DockerCli::new(self.docker_bin.clone());
        match docker.exec(&Self::abort_args(request)).await {
            Ok(_) => Ok(()),
            Err(reason) if is_not_found(&reason) => {
                debug!(container = %request.container_name, "verifier container already gone");
                Ok(())
            }
            Err(reason) => Err(HarnessError::ContainerTeardown {
                container: request.container_name.clone(),
                reason,
            }),
        }
    }
}
