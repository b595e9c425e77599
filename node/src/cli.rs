//! # CLI Interface
//!
//! Command-line arguments for `mystic-node`, via `clap` derive. Every gate
//! setting can also come from the environment, which is how deployments
//! supply the authority credentials.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use mystic_protocol::config::{
    self, parse_action_list, Credentials, GateConfig, DEFAULT_ACTION, DEFAULT_ACTIONS,
    DEFAULT_AUTHORITY_URL,
};
use mystic_protocol::ConfigError;

use crate::logging::LogFormat;

/// Mystic Path verification gateway.
///
/// Issues sign-in nonces, verifies wallet signatures and checks identity
/// proofs with the remote verification authority.
#[derive(Parser, Debug)]
#[command(
    name = "mystic-node",
    about = "Mystic Path verification gateway",
    version,
    propagate_version = true
)]
pub struct MysticNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Validate configuration and exit non-zero if the gateway could not
    /// verify anything.
    CheckConfig(GateArgs),
    /// Query a running gateway's health endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub gate: GateArgs,

    /// Interface the API binds to.
    #[arg(long, env = "MYSTIC_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API.
    #[arg(long, env = "MYSTIC_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MYSTIC_METRICS_PORT", default_value_t = 9797)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "MYSTIC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Settings of the verification gate itself.
#[derive(Args, Debug, Clone)]
pub struct GateArgs {
    /// Application identifier issued by the verification authority.
    #[arg(long, env = "WLD_APP_ID", hide_env_values = true)]
    pub app_id: Option<String>,

    /// Bearer credential for the verification authority.
    #[arg(long, env = "WLD_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Base URL of the verification authority.
    #[arg(long, env = "MYSTIC_AUTHORITY_URL", default_value = DEFAULT_AUTHORITY_URL)]
    pub authority_url: String,

    /// Per-request authority timeout, in milliseconds.
    #[arg(long, env = "MYSTIC_AUTHORITY_TIMEOUT_MS", default_value_t = 5000)]
    pub authority_timeout_ms: u64,

    /// Retries for transient authority failures.
    #[arg(long, env = "MYSTIC_AUTHORITY_RETRIES", default_value_t = 2)]
    pub authority_retries: u32,

    /// How long an issued nonce stays redeemable, in seconds.
    #[arg(long, env = "MYSTIC_NONCE_TTL_SECS", default_value_t = 300)]
    pub nonce_ttl_secs: u64,

    /// Session lifetime, in seconds.
    #[arg(long, env = "MYSTIC_SESSION_TTL_SECS", default_value_t = 86_400)]
    pub session_ttl_secs: u64,

    /// Registered actions as `name=periodicity[:scope]`, comma-separated.
    #[arg(long, env = "MYSTIC_ACTIONS", default_value = DEFAULT_ACTIONS)]
    pub actions: String,

    /// Action assumed by `/api/verify` when the request names none.
    #[arg(long, env = "MYSTIC_DEFAULT_ACTION", default_value = DEFAULT_ACTION)]
    pub default_action: String,

    /// Reject sign-in messages issued for any other domain.
    #[arg(long, env = "MYSTIC_SIWE_DOMAIN")]
    pub siwe_domain: Option<String>,
}

impl GateArgs {
    /// Builds the gate configuration.
    ///
    /// Structural problems (bad action list, unknown default action) are
    /// errors. Missing or invalid credentials are not: they are carried
    /// inside the returned config so the gateway can start and report them
    /// on every verification request.
    pub fn to_config(&self) -> Result<GateConfig, ConfigError> {
        let credentials =
            Credentials::from_parts(self.app_id.as_deref(), self.secret_key.as_deref());

        let config = GateConfig {
            credentials,
            actions: parse_action_list(&self.actions)?,
            default_action: self.default_action.trim().to_string(),
            authority_url: self.authority_url.clone(),
            authority_timeout: Duration::from_millis(self.authority_timeout_ms),
            authority_retries: self.authority_retries,
            nonce_ttl: Duration::from_secs(self.nonce_ttl_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            siwe_domain: self
                .siwe_domain
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the `status` subcommand.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Base URL of the running gateway.
    #[arg(long, env = "MYSTIC_URL", default_value = "http://127.0.0.1:8787")]
    pub url: String,
}

/// One-line summary of a configuration for startup logs and `check-config`.
pub fn describe(config: &GateConfig) -> String {
    let actions = config
        .actions
        .iter()
        .map(|a| format!("{}={}", a.name, a.periodicity))
        .collect::<Vec<_>>()
        .join(",");
    let app_id = config
        .credentials()
        .map(|c| c.app_id().to_string())
        .unwrap_or_else(|e| format!("<{}>", e.code()));
    format!(
        "app_id={app_id} authority={} actions=[{actions}] default_action={} protocol={}",
        config.authority_url,
        config.default_action,
        config::PROTOCOL_VERSION
    )
}
