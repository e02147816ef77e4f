//! Isolated test network provisioning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::docker::{is_not_found, DockerCli, MANAGED_LABEL};
use crate::error::{HarnessError, HarnessResult};

/// An isolated network segment owned by one harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestNetwork {
    /// Generated, run-unique network name.
    pub name: String,

    /// Network driver (bridge-style isolation).
    pub driver: String,
}

impl TestNetwork {
    /// Reserve a fresh, unique network name. Nothing is created yet.
    pub fn reserve(driver: &str) -> Self {
        Self {
            name: format!("contract-net-{}", Uuid::new_v4().simple()),
            driver: driver.to_string(),
        }
    }
}

/// Creates and destroys test networks.
#[async_trait]
pub trait NetworkProvisioner: Send + Sync {
    /// Create the network. Must succeed before any container work starts.
    async fn create(&self, network: &TestNetwork) -> HarnessResult<()>;

    /// Remove the network.
    ///
    /// A network that no longer exists counts as removed.
    async fn destroy(&self, network: TestNetwork) -> HarnessResult<()>;
}

/// Provisioner backed by `docker network`.
#[derive(Debug, Clone, Default)]
pub struct DockerNetworkProvisioner {
    docker: DockerCli,
}

impl DockerNetworkProvisioner {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    pub fn create_args(network: &TestNetwork) -> Vec<String> {
        vec![
            "network".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            network.driver.clone(),
            "--label".to_string(),
            MANAGED_LABEL.to_string(),
            network.name.clone(),
        ]
    }

    pub fn remove_args(network: &TestNetwork) -> Vec<String> {
        vec!["network".to_string(), "rm".to_string(), network.name.clone()]
    }
}

#[async_trait]
impl NetworkProvisioner for DockerNetworkProvisioner {
    async fn create(&self, network: &TestNetwork) -> HarnessResult<()> {
        self.docker
            .exec(&Self::create_args(network))
            .await
            .map(|_| ())
            .map_err(|reason| HarnessError::NetworkCreation {
                network: network.name.clone(),
                reason,
            })
    }

    async fn destroy(&self, network: TestNetwork) -> HarnessResult<()> {
        match self.docker.exec(&Self::remove_args(&network)).await {
            Ok(_) => Ok(()),
            Err(reason) if is_not_found(&reason) => {
                debug!(network = %network.name, "network already gone");
                Ok(())
            }
            Err(reason) => Err(HarnessError::NetworkTeardown {
                network: network.name,
                reason,
            }),
        }
    }
}
