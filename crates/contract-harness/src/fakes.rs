//! In-memory fakes for the coordinator seams (testing only)
//!
//! Provides `FakeNetworkProvisioner`, `FakeContainerLauncher`,
//! `FakeReadinessProbe` and `FakeVerifier`. All of them append to a shared
//! [`CallLog`] so tests can assert on ordering and call counts.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::container::{ContainerLauncher, ContainerRequest, ServiceContainer};
use crate::error::{HarnessError, HarnessResult};
use crate::network::{NetworkProvisioner, TestNetwork};
use crate::readiness::ReadinessProbe;
use crate::verifier::{VerificationOutcome, VerificationRequest, Verifier};

/// One recorded interaction with a fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateNetwork(String),
    DestroyNetwork(String),
    CreateContainer { name: String, network: String, alias: String },
    TerminateContainer(String),
    Probe(String),
    Verify(VerificationRequest),
    AbortVerifier(String),
}

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// The verifier request, if the verifier was called.
    pub fn verify_request(&self) -> Option<VerificationRequest> {
        self.calls.lock().unwrap().iter().find_map(|c| match c {
            Call::Verify(request) => Some(request.clone()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeNetworkProvisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeNetworkProvisioner {
    log: CallLog,
    fail_create: Option<String>,
    fail_destroy: Option<String>,
}

impl FakeNetworkProvisioner {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_create: None,
            fail_destroy: None,
        }
    }

    pub fn failing_create(mut self, reason: &str) -> Self {
        self.fail_create = Some(reason.to_string());
        self
    }

    pub fn failing_destroy(mut self, reason: &str) -> Self {
        self.fail_destroy = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl NetworkProvisioner for FakeNetworkProvisioner {
    async fn create(&self, network: &TestNetwork) -> HarnessResult<()> {
        self.log.record(Call::CreateNetwork(network.name.clone()));
        match &self.fail_create {
            Some(reason) => Err(HarnessError::NetworkCreation {
                network: network.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn destroy(&self, network: TestNetwork) -> HarnessResult<()> {
        self.log.record(Call::DestroyNetwork(network.name.clone()));
        match &self.fail_destroy {
            Some(reason) => Err(HarnessError::NetworkTeardown {
                network: network.name,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeContainerLauncher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeContainerLauncher {
    log: CallLog,
    fail_create: Option<String>,
    fail_terminate: Option<String>,
}

impl FakeContainerLauncher {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_create: None,
            fail_terminate: None,
        }
    }

    pub fn failing_create(mut self, reason: &str) -> Self {
        self.fail_create = Some(reason.to_string());
        self
    }

    pub fn failing_terminate(mut self, reason: &str) -> Self {
        self.fail_terminate = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl ContainerLauncher for FakeContainerLauncher {
    async fn create(
        &self,
        request: &ContainerRequest,
        network: &TestNetwork,
    ) -> HarnessResult<ServiceContainer> {
        self.log.record(Call::CreateContainer {
            name: request.name.clone(),
            network: network.name.clone(),
            alias: request.alias.clone(),
        });
        if let Some(reason) = &self.fail_create {
            return Err(HarnessError::ContainerStart {
                image: request.image.clone(),
                reason: reason.clone(),
            });
        }
        Ok(ServiceContainer {
            id: format!("id-{}", request.name),
            name: request.name.clone(),
            image: request.image.clone(),
            port: request.port,
            network: network.name.clone(),
            alias: request.alias.clone(),
            host_port: Some(49153),
        })
    }

    async fn remove(&self, container: ServiceContainer) -> HarnessResult<()> {
        self.log.record(Call::TerminateContainer(container.name.clone()));
        match &self.fail_terminate {
            Some(reason) => Err(HarnessError::ContainerTeardown {
                container: container.name,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeReadinessProbe
// ---------------------------------------------------------------------------

/// Probe that turns ready on a given attempt, or never.
#[derive(Debug)]
pub struct FakeReadinessProbe {
    log: CallLog,
    ready_on_attempt: Option<usize>,
    attempts: Mutex<usize>,
}

impl FakeReadinessProbe {
    pub fn ready(log: CallLog) -> Self {
        Self::ready_on_attempt(log, 1)
    }

    pub fn ready_on_attempt(log: CallLog, attempt: usize) -> Self {
        Self {
            log,
            ready_on_attempt: Some(attempt),
            attempts: Mutex::new(0),
        }
    }

    pub fn never_ready(log: CallLog) -> Self {
        Self {
            log,
            ready_on_attempt: None,
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ReadinessProbe for FakeReadinessProbe {
    async fn probe(&self, container: &ServiceContainer) -> Result<(), String> {
        self.log.record(Call::Probe(container.name.clone()));
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        match self.ready_on_attempt {
            Some(ready_on) if *attempts >= ready_on => Ok(()),
            _ => Err("connection refused".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeVerifier
// ---------------------------------------------------------------------------

/// Verifier returning a canned outcome, or never returning at all.
#[derive(Debug, Clone)]
pub struct FakeVerifier {
    log: CallLog,
    outcome: Option<VerificationOutcome>,
}

impl FakeVerifier {
    pub fn new(log: CallLog, outcome: VerificationOutcome) -> Self {
        Self {
            log,
            outcome: Some(outcome),
        }
    }

    /// A verifier whose run never finishes.
    pub fn hanging(log: CallLog) -> Self {
        Self { log, outcome: None }
    }

    pub fn exiting(log: CallLog, exit_code: i32, output: &str) -> Self {
        Self::new(
            log,
            VerificationOutcome::Completed {
                exit_code,
                output: output.as_bytes().to_vec(),
                duration_ms: 1,
            },
        )
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn run(&self, request: &VerificationRequest) -> VerificationOutcome {
        self.log.record(Call::Verify(request.clone()));
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => std::future::pending().await,
        }
    }

    async fn abort(&self, request: &VerificationRequest) -> HarnessResult<()> {
        self.log
            .record(Call::AbortVerifier(request.container_name.clone()));
        Ok(())
    }
}
