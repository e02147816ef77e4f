//! Thin wrapper over the `docker` executable.

use tracing::debug;

use crate::process::{render_command, run_captured};

/// Label attached to every resource the harness creates.
pub const MANAGED_LABEL: &str = "org.stevedores.contract-harness.managed=true";

/// Handle to a docker CLI binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run a docker subcommand and return its trimmed output.
    ///
    /// A spawn failure or a nonzero exit both yield `Err` with a message
    /// suitable for an error variant.
    pub async fn exec(&self, args: &[String]) -> Result<String, String> {
        debug!(command = %render_command(&self.program, args), "docker");

        let captured = run_captured(&self.program, args)
            .await
            .map_err(|e| format!("could not run {}: {}", self.program, e))?;

        if captured.succeeded() {
            Ok(captured.text().trim().to_string())
        } else {
            Err(format!(
                "`{}` exited with code {}: {}",
                render_command(&self.program, args),
                captured.exit_code,
                captured.text().trim()
            ))
        }
    }

    /// Check whether a docker daemon is reachable.
    pub async fn is_available(&self) -> bool {
        self.exec(&["info".to_string(), "--format".to_string(), "{{.ServerVersion}}".to_string()])
            .await
            .is_ok()
    }
}

/// Whether a docker error message says the object is already gone.
pub fn is_not_found(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("no such network")
        || lower.contains("no such container")
        || lower.contains("not found")
}
