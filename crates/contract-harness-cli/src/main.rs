//! Contract Harness CLI
//!
//! The `contract-harness` command runs the service under test in an isolated
//! docker network and checks it against its API specification.
//!
//! ## Commands
//!
//! - `run`: Run one contract test and exit nonzero unless it passed
//! - `check`: Check that a docker daemon is reachable
//! - `config`: Print the effective configuration

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use contract_harness::config::{
    parse_flag, DEFAULT_READINESS_PATH, DEFAULT_SERVICE_ALIAS, DEFAULT_SERVICE_IMAGE,
    DEFAULT_SERVICE_PORT, DEFAULT_SPEC_FILE, DEFAULT_STARTUP_TIMEOUT_SECS, DEFAULT_VERIFIER_IMAGE,
    ENV_CUSTOM_RESPONSE, ENV_GENERATIVE_TESTS, ENV_OAUTH_TOKEN, ENV_ONLY_POSITIVE,
};
use contract_harness::{
    DockerCli, HarnessConfig, LifecycleCoordinator, ProbeConfig, RunReport, ServiceConfig,
    VerifierConfig,
};

#[derive(Parser)]
#[command(name = "contract-harness")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Contract tests against a live service in an isolated network", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one contract test
    Run {
        #[command(flatten)]
        options: RunOptions,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check that the docker daemon is reachable
    Check {
        /// Docker executable
        #[arg(long, default_value = "docker")]
        docker_bin: String,
    },

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(Args, Debug, Clone)]
struct RunOptions {
    /// Image of the service under test
    #[arg(long, default_value = DEFAULT_SERVICE_IMAGE)]
    image: String,

    /// Port the service listens on inside its container
    #[arg(long, default_value_t = DEFAULT_SERVICE_PORT)]
    port: u16,

    /// Network alias of the service
    #[arg(long, default_value = DEFAULT_SERVICE_ALIAS)]
    alias: String,

    /// Path polled until the service is ready
    #[arg(long, default_value = DEFAULT_READINESS_PATH)]
    readiness_path: String,

    /// Seconds to wait for the service to become ready
    #[arg(long, default_value_t = DEFAULT_STARTUP_TIMEOUT_SECS)]
    startup_timeout: u64,

    /// Image of the specification verifier
    #[arg(long, default_value = DEFAULT_VERIFIER_IMAGE)]
    verifier_image: String,

    /// Specification file, relative to the project directory
    #[arg(long, default_value = DEFAULT_SPEC_FILE)]
    spec_file: String,

    /// Project directory mounted into the verifier (default: git work tree root)
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Docker network driver
    #[arg(long, default_value = "bridge")]
    network_driver: String,

    /// Docker executable
    #[arg(long, default_value = "docker")]
    docker_bin: String,

    /// Bearer credential forwarded to the verifier
    #[arg(long, env = ENV_OAUTH_TOKEN, hide_env_values = true)]
    oauth_token: Option<String>,

    /// Let the verifier accept custom responses
    #[arg(long, env = ENV_CUSTOM_RESPONSE, default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    custom_response: bool,

    /// Let the verifier generate additional tests
    #[arg(long, env = ENV_GENERATIVE_TESTS, default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    generative_tests: bool,

    /// Run only positive scenarios
    #[arg(long, env = ENV_ONLY_POSITIVE, default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    only_positive: bool,
}

impl RunOptions {
    fn into_config(self) -> HarnessConfig {
        HarnessConfig {
            service: ServiceConfig {
                image: self.image,
                port: self.port,
                alias: self.alias,
                readiness_path: self.readiness_path,
                startup_timeout_secs: self.startup_timeout,
            },
            verifier: VerifierConfig {
                image: self.verifier_image,
                spec_file: self.spec_file,
                oauth_token: self.oauth_token.unwrap_or_default(),
                custom_response: self.custom_response,
                generative_tests: self.generative_tests,
                only_positive: self.only_positive,
            },
            probe: ProbeConfig::default(),
            project_dir: self.project_dir,
            network_driver: self.network_driver,
            docker_bin: self.docker_bin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    contract_harness::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { options, report } => cmd_run(options.into_config(), report.as_deref()).await,
        Commands::Check { docker_bin } => cmd_check(&docker_bin).await,
        Commands::Config { options } => cmd_config(&options.into_config()),
    }
}

async fn cmd_run(config: HarnessConfig, report_path: Option<&Path>) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let coordinator = LifecycleCoordinator::docker(&config)
        .context("Failed to set up the contract harness")?
        .with_cancellation(cancel);

    let report = coordinator.execute(&config).await;

    if let Some(path) = report_path {
        write_report(&report, path)?;
        info!(path = %path.display(), "run report written");
    }

    print_summary(&report)?;

    let report = report.into_result()?;
    println!("Contract tests passed ({} ms)", report.duration_ms);
    Ok(())
}

async fn cmd_check(docker_bin: &str) -> Result<()> {
    let docker = DockerCli::new(docker_bin);
    if !docker.is_available().await {
        bail!("docker daemon not reachable via '{}'", docker.program());
    }
    println!("Docker: available ({})", docker.program());
    Ok(())
}

fn cmd_config(config: &HarnessConfig) -> Result<()> {
    let mut value = serde_json::to_value(config)?;
    if !config.verifier.oauth_token.is_empty() {
        value["verifier"]["oauth_token"] = serde_json::Value::String("***".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let body = serde_json::to_string_pretty(&report.to_json())?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write run report to {}", path.display()))
}

fn print_summary(report: &RunReport) -> Result<()> {
    println!("Run:       {}", report.run_id);
    if let Some(network) = &report.network {
        println!("Network:   {}", network);
    }
    if let Some(container) = &report.container {
        println!("Container: {}", container);
    }
    println!("Outcome:   {}", report.outcome.label());

    if let Some(output) = report.outcome.output() {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout)?;
        stdout.write_all(output)?;
        if !output.ends_with(b"\n") {
            writeln!(stdout)?;
        }
    }

    if !report.teardown.is_clean() {
        println!("\nTeardown problems:");
        for error in &report.teardown.errors {
            println!("  - {}", error);
        }
    }
    Ok(())
}
