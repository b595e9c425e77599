// Copyright (c) 2026 Mystic Path. MIT License.
// See LICENSE for details.

//! # Mystic Path Gateway
//!
//! Entry point for the `mystic-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the verification API.
//!
//! The binary supports four subcommands:
//!
//! - `run`          start the gateway
//! - `check-config` validate settings and credentials, then exit
//! - `status`       query a running gateway's health endpoint
//! - `version`      print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use mystic_protocol::config::{HOUSEKEEPING_INTERVAL, PROTOCOL_VERSION};
use mystic_protocol::VerificationService;

use cli::{Commands, MysticNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MysticNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_gateway(args).await,
        Commands::CheckConfig(args) => check_config(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the gateway: API server, metrics endpoint and housekeeping.
async fn run_gateway(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(args.log_format, logging::DEFAULT_FILTER)
        .context("failed to install log subscriber")?;

    let config = args
        .gate
        .to_config()
        .context("invalid gateway configuration")?;

    tracing::info!(
        host = %args.host,
        port = args.port,
        metrics_port = args.metrics_port,
        config = %cli::describe(&config),
        "starting mystic-node"
    );
    // The gateway still starts so health checks and nonces keep working.
    if let Err(e) = config.credentials() {
        tracing::error!(
            error = %e,
            "authority credentials unusable; every verification will fail with {}",
            e.code()
        );
    }

    let service = Arc::new(VerificationService::from_config(config));
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION
        ),
        service: Arc::clone(&service),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.host, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.host, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Housekeeping ---
    let service_ref = Arc::clone(&service);
    let metrics_ref = Arc::clone(&node_metrics);
    let housekeeping = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            service_ref.housekeeping();
            metrics_ref.observe_stats(&service_ref.stats());
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    housekeeping.abort();
    tracing::info!("mystic-node stopped");
    Ok(())
}

/// Validates the configuration and exits non-zero if the gateway could not
/// verify anything with it.
fn check_config(args: cli::GateArgs) -> Result<()> {
    logging::init_logging(LogFormat::Pretty, logging::QUIET_FILTER)
        .context("failed to install log subscriber")?;

    let config = args.to_config().context("invalid gateway configuration")?;
    println!("{}", cli::describe(&config));

    if let Err(e) = config.credentials() {
        bail!("{} ({})", e, e.code());
    }
    println!("configuration ok");
    Ok(())
}

/// Queries a running gateway's health endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("failed to read health response")?;
    println!("{}", body);

    if !status.is_success() {
        bail!("gateway answered {}", status);
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("mystic-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", PROTOCOL_VERSION);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
