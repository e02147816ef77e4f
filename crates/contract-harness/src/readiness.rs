//! Readiness gating for the service container.
//!
//! The container is polled with a doubling delay until a probe succeeds or
//! the startup timeout elapses. The wait can be abandoned at any point
//! through a [`CancellationToken`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::container::ServiceContainer;
use crate::error::{HarnessError, HarnessResult};

/// A single readiness check against a container.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok` once the container can take traffic, otherwise a description
    /// of what was observed.
    async fn probe(&self, container: &ServiceContainer) -> Result<(), String>;
}

/// Probe that issues `GET <path>` against the published port.
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpReadinessProbe {
    pub fn new(path: impl Into<String>, request_timeout: Duration) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| std::io::Error::other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn probe(&self, container: &ServiceContainer) -> Result<(), String> {
        let url = container
            .host_url(&self.path)
            .ok_or_else(|| format!("container {} has no published port", container.name))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("GET {} returned status {}", url, response.status()))
        }
    }
}

/// Poll `probe` until it succeeds, `startup_timeout` elapses or `cancel`
/// fires.
///
/// Returns the number of attempts it took. On timeout the error carries the
/// last observed failure.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    container: &ServiceContainer,
    startup_timeout: Duration,
    config: &ProbeConfig,
    cancel: &CancellationToken,
) -> HarnessResult<u32> {
    let deadline = Instant::now() + startup_timeout;
    let mut delay = config.initial_interval();
    let mut attempts = 0u32;
    let mut last_failure = String::from("no probe attempt completed");

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HarnessError::ReadinessTimeout {
                timeout: startup_timeout,
                last_failure,
            });
        }

        attempts += 1;
        let attempt = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarnessError::Cancelled { phase: "readiness wait".to_string() });
            }
            attempt = timeout(remaining, probe.probe(container)) => attempt,
        };

        match attempt {
            Ok(Ok(())) => return Ok(attempts),
            Ok(Err(failure)) => last_failure = failure,
            Err(_elapsed) => last_failure = format!("probe attempt {} did not answer in time", attempts),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarnessError::Cancelled { phase: "readiness wait".to_string() });
            }
            _ = sleep(delay.min(remaining)) => {}
        }

        delay = next_delay(delay, config);
    }
}

/// Doubled delay, capped at the configured maximum.
fn next_delay(delay: Duration, config: &ProbeConfig) -> Duration {
    delay.saturating_mul(2).min(config.max_interval())
}
