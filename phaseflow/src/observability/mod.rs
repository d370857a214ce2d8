//! Diagnostic logging setup.
//!
//! Tracing output is for operators debugging a run. It is not persisted and
//! carries no state: the progress record and its decision log are the
//! durable account of what happened.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::PhaseflowError;

/// Output format for diagnostic logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Single-line human-readable records.
    #[default]
    Compact,
    /// One JSON object per record.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Installs a global subscriber writing to stderr.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Fails if a global subscriber is
/// already installed.
///
/// ```bash
/// RUST_LOG=phaseflow=debug my-workflow resume
/// ```
pub fn init_tracing(format: LogFormat) -> Result<(), PhaseflowError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    };
    result.map_err(|e| PhaseflowError::Internal(format!("tracing already initialised: {e}")))
}
