//! Centralised tracing initialisation for harness binaries.
//!
//! Call [`init_tracing`] once at program start. Without `RUST_LOG` the
//! harness logs at the requested level while the HTTP and process
//! dependencies stay at `warn`.
//! Later calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Target of the harness library and its binary.
const HARNESS_TARGET: &str = "contract_harness";

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> String {
    format!("warn,{}={}", HARNESS_TARGET, level.as_str().to_ascii_lowercase())
}

/// Initialise the global tracing subscriber.
///
/// * `json` — emit newline-delimited JSON log lines, one object per
///   `harness.*` event.
/// * `level` — harness verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(fmt::layer().with_target(false).json().flatten_event(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_harness_level() {
        assert_eq!(default_directives(Level::DEBUG), "warn,contract_harness=debug");
        assert_eq!(default_directives(Level::INFO), "warn,contract_harness=info");
    }

    #[test]
    fn test_default_directives_parse() {
        EnvFilter::try_new(default_directives(Level::TRACE)).expect("valid filter");
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}
