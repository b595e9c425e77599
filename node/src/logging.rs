//! # Structured Logging
//!
//! One `tracing` registry for the whole process, filtered by `RUST_LOG`
//! and written to stderr so `check-config` and `status` keep stdout clean.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for `run` when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "mystic_node=info,mystic_protocol=info,tower_http=debug";

/// Filter for one-shot subcommands: only problems.
pub const QUIET_FILTER: &str = "mystic_node=warn,mystic_protocol=warn";

/// Log output format, selected with `--log-format` / `MYSTIC_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(format: LogFormat, default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Exactly one of the two layers is present.
    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    tracing::debug!(?format, "logging initialized");
    Ok(())
}
