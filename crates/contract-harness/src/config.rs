//! Harness configuration.
//!
//! All configuration is built once at the program boundary and passed down
//! by reference. Nothing below this module reads the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Image of the service under test.
pub const DEFAULT_SERVICE_IMAGE: &str = "specmatic-go-service:latest";
/// Port the service listens on inside its container.
pub const DEFAULT_SERVICE_PORT: u16 = 8090;
/// Hostname the service is reachable under on the test network.
pub const DEFAULT_SERVICE_ALIAS: &str = "go-service";
/// Path polled until the service answers with a success status.
pub const DEFAULT_READINESS_PATH: &str = "/actuator/mappings";
/// Upper bound for the readiness wait.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
/// Image of the specification verifier.
pub const DEFAULT_VERIFIER_IMAGE: &str = "specmatic/specmatic";
/// Specification file, relative to the project directory.
pub const DEFAULT_SPEC_FILE: &str = "products_api.yaml";
/// Mount point of the project directory inside the verifier container.
pub const VERIFIER_WORKDIR: &str = "/app";

/// Environment variable names understood by the verifier.
pub const ENV_OAUTH_TOKEN: &str = "SPECMATIC_OAUTH2_TOKEN";
pub const ENV_CUSTOM_RESPONSE: &str = "CUSTOM_RESPONSE";
pub const ENV_GENERATIVE_TESTS: &str = "SPECMATIC_GENERATIVE_TESTS";
pub const ENV_ONLY_POSITIVE: &str = "ONLY_POSITIVE";

/// Configuration of the service container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Image reference to run.
    pub image: String,

    /// Container-internal port the service listens on.
    pub port: u16,

    /// Network alias other participants use to reach the service.
    pub alias: String,

    /// HTTP path answered once the service can take traffic.
    pub readiness_path: String,

    /// Startup timeout in seconds.
    pub startup_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SERVICE_IMAGE.to_string(),
            port: DEFAULT_SERVICE_PORT,
            alias: DEFAULT_SERVICE_ALIAS.to_string(),
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    /// Startup timeout as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Configuration handed to the verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    /// Verifier image reference.
    pub image: String,

    /// Specification file relative to the project directory.
    pub spec_file: String,

    /// Bearer credential forwarded to the verifier.
    pub oauth_token: String,

    /// Whether the verifier should accept custom responses.
    pub custom_response: bool,

    /// Whether the verifier should generate additional tests.
    pub generative_tests: bool,

    /// Whether only positive scenarios should be run.
    pub only_positive: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_VERIFIER_IMAGE.to_string(),
            spec_file: DEFAULT_SPEC_FILE.to_string(),
            oauth_token: String::new(),
            custom_response: false,
            generative_tests: false,
            only_positive: false,
        }
    }
}

impl VerifierConfig {
    /// Environment handed to the verifier, in a fixed order.
    ///
    /// Every option is always present, defaults included.
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_OAUTH_TOKEN, self.oauth_token.clone()),
            (ENV_CUSTOM_RESPONSE, self.custom_response.to_string()),
            (ENV_GENERATIVE_TESTS, self.generative_tests.to_string()),
            (ENV_ONLY_POSITIVE, self.only_positive.to_string()),
        ]
    }
}

/// Readiness polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Delay before the second probe attempt (milliseconds).
    pub initial_interval_ms: u64,

    /// Cap for the doubling delay between attempts (milliseconds).
    pub max_interval_ms: u64,

    /// Timeout of a single probe request (milliseconds).
    pub request_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 2_000,
            request_timeout_ms: 2_000,
        }
    }
}

impl ProbeConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete configuration of one harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    pub service: ServiceConfig,
    pub verifier: VerifierConfig,
    pub probe: ProbeConfig,

    /// Project directory mounted into the verifier. Resolved from git when unset.
    pub project_dir: Option<PathBuf>,

    /// Docker network driver.
    pub network_driver: String,

    /// Docker executable.
    pub docker_bin: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            verifier: VerifierConfig::default(),
            probe: ProbeConfig::default(),
            project_dir: None,
            network_driver: "bridge".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

/// Parse a boolean option the way the verifier environment spells them.
///
/// An empty value means "unset" and resolves to `false`.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_defaults() {
        let cfg = VerifierConfig::default();
        assert_eq!(cfg.oauth_token, "");
        assert!(!cfg.custom_response);
        assert!(!cfg.generative_tests);
        assert!(!cfg.only_positive);
        assert_eq!(cfg.spec_file, "products_api.yaml");
    }

    #[test]
    fn test_env_pairs_always_include_defaults() {
        let pairs = VerifierConfig::default().env_pairs();
        assert_eq!(
            pairs,
            vec![
                ("SPECMATIC_OAUTH2_TOKEN", String::new()),
                ("CUSTOM_RESPONSE", "false".to_string()),
                ("SPECMATIC_GENERATIVE_TESTS", "false".to_string()),
                ("ONLY_POSITIVE", "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_pairs_reflect_overrides() {
        let cfg = VerifierConfig {
            oauth_token: "tok".to_string(),
            generative_tests: true,
            ..VerifierConfig::default()
        };
        let pairs = cfg.env_pairs();
        assert_eq!(pairs[0].1, "tok");
        assert_eq!(pairs[1].1, "false");
        assert_eq!(pairs[2].1, "true");
    }

    #[test]
    fn test_service_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.image, "specmatic-go-service:latest");
        assert_eq!(cfg.alias, "go-service");
        assert_eq!(cfg.readiness_path, "/actuator/mappings");
        assert_eq!(cfg.startup_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(""), Ok(false));
        assert_eq!(parse_flag("false"), Ok(false));
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag(" 1 "), Ok(true));
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let cfg: HarnessConfig =
            serde_json::from_str(r#"{"verifier": {"only_positive": true}}"#).unwrap();
        assert!(cfg.verifier.only_positive);
        assert!(!cfg.verifier.custom_response);
        assert_eq!(cfg.service, ServiceConfig::default());
        assert_eq!(cfg.network_driver, "bridge");
    }
}
