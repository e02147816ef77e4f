//! Service-under-test container lifecycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::docker::{is_not_found, DockerCli, MANAGED_LABEL};
use crate::error::{HarnessError, HarnessResult};
use crate::network::TestNetwork;

/// What to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Generated, run-unique container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Container-internal port.
    pub port: u16,

    /// Alias on the test network.
    pub alias: String,
}

impl ContainerRequest {
    /// Build a request with a fresh container name.
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            name: format!("contract-svc-{}", Uuid::new_v4().simple()),
            image: service.image.clone(),
            port: service.port,
            alias: service.alias.clone(),
        }
    }
}

/// A running instance of the service under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceContainer {
    /// Container ID reported by the runtime.
    pub id: String,

    /// Container name.
    pub name: String,

    pub image: String,

    /// Container-internal port.
    pub port: u16,

    /// Network the container is attached to.
    pub network: String,

    /// Alias on that network.
    pub alias: String,

    /// Loopback port the container port is published on, if any.
    pub host_port: Option<u16>,
}

impl ServiceContainer {
    /// Base URL as seen from inside the test network.
    ///
    /// Built from the alias, never from an address, because the alias is
    /// chosen before the container exists.
    pub fn network_base_url(&self) -> String {
        format!("http://{}:{}", self.alias, self.port)
    }

    /// URL for `path` as reachable from the host running the harness.
    pub fn host_url(&self, path: &str) -> Option<String> {
        self.host_port
            .map(|port| format!("http://127.0.0.1:{}{}", port, path))
    }
}

/// Starts and stops service containers.
#[async_trait]
pub trait ContainerLauncher: Send + Sync {
    /// Create and start a container attached to `network` under the
    /// request's alias.
    ///
    /// On failure nothing is left behind.
    async fn create(
        &self,
        request: &ContainerRequest,
        network: &TestNetwork,
    ) -> HarnessResult<ServiceContainer>;

    /// Stop and remove the container.
    async fn remove(&self, container: ServiceContainer) -> HarnessResult<()>;

    /// Stop and remove the container if there is one.
    async fn terminate(&self, container: Option<ServiceContainer>) -> HarnessResult<()> {
        match container {
            Some(container) => self.remove(container).await,
            None => Ok(()),
        }
    }
}

/// Launcher backed by `docker run`.
#[derive(Debug, Clone, Default)]
pub struct DockerContainerLauncher {
    docker: DockerCli,
}

impl DockerContainerLauncher {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    pub fn run_args(request: &ContainerRequest, network: &TestNetwork) -> Vec<String> {
        vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            request.name.clone(),
            "--network".to_string(),
            network.name.clone(),
            "--network-alias".to_string(),
            request.alias.clone(),
            "--label".to_string(),
            MANAGED_LABEL.to_string(),
            "--publish".to_string(),
            format!("127.0.0.1::{}", request.port),
            request.image.clone(),
        ]
    }

    pub fn port_args(name: &str, port: u16) -> Vec<String> {
        vec!["port".to_string(), name.to_string(), format!("{}/tcp", port)]
    }

    pub fn remove_args(name: &str) -> Vec<String> {
        vec![
            "rm".to_string(),
            "--force".to_string(),
            "--volumes".to_string(),
            name.to_string(),
        ]
    }

    /// Remove whatever a failed start left behind.
    async fn discard(&self, name: &str) {
        if let Err(reason) = self.docker.exec(&Self::remove_args(name)).await {
            if !is_not_found(&reason) {
                warn!(container = %name, error = %reason, "failed to discard partially started container");
            }
        }
    }
}

#[async_trait]
impl ContainerLauncher for DockerContainerLauncher {
    async fn create(
        &self,
        request: &ContainerRequest,
        network: &TestNetwork,
    ) -> HarnessResult<ServiceContainer> {
        let start_error = |reason: String| HarnessError::ContainerStart {
            image: request.image.clone(),
            reason,
        };

        let id = match self.docker.exec(&Self::run_args(request, network)).await {
            Ok(id) => id,
            Err(reason) => {
                self.discard(&request.name).await;
                return Err(start_error(reason));
            }
        };

        let mapping = match self
            .docker
            .exec(&Self::port_args(&request.name, request.port))
            .await
        {
            Ok(mapping) => mapping,
            Err(reason) => {
                self.discard(&request.name).await;
                return Err(start_error(format!("port lookup failed: {}", reason)));
            }
        };

        let Some(host_port) = parse_host_port(&mapping) else {
            self.discard(&request.name).await;
            return Err(start_error(format!(
                "unexpected port mapping '{}'",
                mapping
            )));
        };
        debug!(container = %request.name, host_port, "container port published");

        Ok(ServiceContainer {
            id,
            name: request.name.clone(),
            image: request.image.clone(),
            port: request.port,
            network: network.name.clone(),
            alias: request.alias.clone(),
            host_port: Some(host_port),
        })
    }

    async fn remove(&self, container: ServiceContainer) -> HarnessResult<()> {
        match self.docker.exec(&Self::remove_args(&container.name)).await {
            Ok(_) => Ok(()),
            Err(reason) if is_not_found(&reason) => {
                debug!(container = %container.name, "container already gone");
                Ok(())
            }
            Err(reason) => Err(HarnessError::ContainerTeardown {
                container: container.name,
                reason,
            }),
        }
    }
}

/// Parse `docker port` output such as `127.0.0.1:49153` or `[::]:49153`.
fn parse_host_port(mapping: &str) -> Option<u16> {
    mapping
        .lines()
        .next()?
        .trim()
        .rsplit(':')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_docker;

    fn network() -> TestNetwork {
        TestNetwork {
            name: "contract-net-test".to_string(),
            driver: "bridge".to_string(),
        }
    }

    fn request() -> ContainerRequest {
        ContainerRequest {
            name: "contract-svc-test".to_string(),
            image: "specmatic-go-service:latest".to_string(),
            port: 8090,
            alias: "go-service".to_string(),
        }
    }

    #[test]
    fn test_request_from_config() {
        let a = ContainerRequest::from_config(&ServiceConfig::default());
        let b = ContainerRequest::from_config(&ServiceConfig::default());
        assert_ne!(a.name, b.name);
        assert_eq!(a.alias, "go-service");
        assert_eq!(a.port, 8090);
    }

    #[test]
    fn test_run_args_attach_alias_on_network() {
        let args = DockerContainerLauncher::run_args(&request(), &network());
        let pos = |flag: &str| args.iter().position(|a| a == flag).expect(flag);
        assert_eq!(args[pos("--network") + 1], "contract-net-test");
        assert_eq!(args[pos("--network-alias") + 1], "go-service");
        assert_eq!(args[pos("--publish") + 1], "127.0.0.1::8090");
        assert_eq!(args.last().map(String::as_str), Some("specmatic-go-service:latest"));
    }

    #[test]
    fn test_parse_host_port() {
        assert_eq!(parse_host_port("127.0.0.1:49153"), Some(49153));
        assert_eq!(parse_host_port("[::]:49154\n0.0.0.0:49154"), Some(49154));
        assert_eq!(parse_host_port(""), None);
        assert_eq!(parse_host_port("garbage"), None);
    }

    #[test]
    fn test_host_url() {
        let container = ServiceContainer {
            id: "abc".to_string(),
            name: "contract-svc-test".to_string(),
            image: "img".to_string(),
            port: 8090,
            network: "net".to_string(),
            alias: "go-service".to_string(),
            host_port: Some(49153),
        };
        assert_eq!(container.network_base_url(), "http://go-service:8090");
        assert_eq!(
            container.host_url("/actuator/mappings").as_deref(),
            Some("http://127.0.0.1:49153/actuator/mappings")
        );
        let unpublished = ServiceContainer {
            host_port: None,
            ..container
        };
        assert!(unpublished.host_url("/").is_none());
    }

    #[tokio::test]
    async fn test_create_against_fake_docker() {
        let (_dir, docker) = fake_docker(
            r#"case "$1" in
                run) echo "0123456789ab" ;;
                port) echo "127.0.0.1:49153" ;;
                *) exit 1 ;;
            esac"#,
        );
        let launcher = DockerContainerLauncher::new(docker);
        let container = launcher
            .create(&request(), &network())
            .await
            .expect("create failed");
        assert_eq!(container.id, "0123456789ab");
        assert_eq!(container.host_port, Some(49153));
        assert_eq!(container.network, "contract-net-test");
        assert_eq!(container.alias, "go-service");
    }

    #[tokio::test]
    async fn test_create_failure_is_container_start_error() {
        let (_dir, docker) = fake_docker(
            r#"case "$1" in
                run) echo "Unable to find image 'nope:latest' locally" >&2; exit 125 ;;
                rm) echo "Error: No such container: contract-svc-test" >&2; exit 1 ;;
                *) exit 1 ;;
            esac"#,
        );
        let launcher = DockerContainerLauncher::new(docker);
        let err = launcher
            .create(&request(), &network())
            .await
            .expect_err("should fail");
        match err {
            HarnessError::ContainerStart { reason, .. } => {
                assert!(reason.contains("Unable to find image"))
            }
            other => panic!("expected ContainerStart, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_none_is_noop() {
        let launcher = DockerContainerLauncher::new(DockerCli::new("definitely-not-docker-4711"));
        launcher.terminate(None).await.expect("no-op should succeed");
    }

    #[tokio::test]
    async fn test_remove_failure_is_container_teardown_error() {
        let (_dir, docker) = fake_docker("echo 'permission denied' >&2; exit 1");
        let launcher = DockerContainerLauncher::new(docker);
        let container = ServiceContainer {
            id: "abc".to_string(),
            name: "contract-svc-test".to_string(),
            image: "img".to_string(),
            port: 8090,
            network: "net".to_string(),
            alias: "go-service".to_string(),
            host_port: None,
        };
        let err = launcher
            .terminate(Some(container))
            .await
            .expect_err("should fail");
        assert!(matches!(err, HarnessError::ContainerTeardown { .. }));
    }
}
