//! # Prometheus Metrics
//!
//! Operational metrics for the verification gateway, scraped at `/metrics`
//! on the dedicated metrics port.
//!
//! All metrics live in a custom [`prometheus::Registry`] with the `mystic`
//! prefix so they never collide with a global registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use mystic_protocol::service::GateStats;

/// Every metric handle the gateway records into.
///
/// Prometheus handles are internally reference-counted, so clones share
/// the same underlying series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Nonces handed out by `GET /api/nonce`.
    pub nonces_issued_total: IntCounter,
    /// Wallet sign-ins accepted.
    pub wallet_auth_success_total: IntCounter,
    /// Wallet sign-ins refused, by reason code.
    pub wallet_auth_failure_total: IntCounterVec,
    /// Proofs newly granted.
    pub proofs_verified_total: IntCounter,
    /// Proofs answered from an existing grant.
    pub proofs_idempotent_total: IntCounter,
    /// Proofs refused by the authority or by format checks.
    pub proofs_rejected_total: IntCounter,
    /// Proof checks that ended without a definitive answer.
    pub authority_unavailable_total: IntCounter,
    pub live_nonces: IntGauge,
    pub live_sessions: IntGauge,
    pub ledger_entries: IntGauge,
    /// Wall time of proof verification, authority round trips included.
    pub authority_latency_seconds: Histogram,
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("mystic".into()), None)?;

        let nonces_issued_total = register(
            &registry,
            IntCounter::new("nonces_issued_total", "Sign-in nonces issued")?,
        )?;
        let wallet_auth_success_total = register(
            &registry,
            IntCounter::new("wallet_auth_success_total", "Wallet sign-ins accepted")?,
        )?;
        let wallet_auth_failure_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("wallet_auth_failure_total", "Wallet sign-ins refused"),
                &["reason"],
            )?,
        )?;
        let proofs_verified_total = register(
            &registry,
            IntCounter::new("proofs_verified_total", "Identity proofs newly granted")?,
        )?;
        let proofs_idempotent_total = register(
            &registry,
            IntCounter::new(
                "proofs_idempotent_total",
                "Identity proofs answered from an existing grant",
            )?,
        )?;
        let proofs_rejected_total = register(
            &registry,
            IntCounter::new("proofs_rejected_total", "Identity proofs rejected")?,
        )?;
        let authority_unavailable_total = register(
            &registry,
            IntCounter::new(
                "authority_unavailable_total",
                "Proof checks that could not reach the verification authority",
            )?,
        )?;
        let live_nonces = register(
            &registry,
            IntGauge::new("live_nonces", "Nonces that can still be redeemed")?,
        )?;
        let live_sessions = register(
            &registry,
            IntGauge::new("live_sessions", "Sessions currently stored")?,
        )?;
        let ledger_entries = register(
            &registry,
            IntGauge::new("ledger_entries", "Verification grants currently stored")?,
        )?;
        let authority_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "authority_latency_seconds",
                    "Identity-proof verification latency in seconds",
                )
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            nonces_issued_total,
            wallet_auth_success_total,
            wallet_auth_failure_total,
            proofs_verified_total,
            proofs_idempotent_total,
            proofs_rejected_total,
            authority_unavailable_total,
            live_nonces,
            live_sessions,
            ledger_entries,
            authority_latency_seconds,
        })
    }

    /// Copies store sizes into the gauges.
    pub fn observe_stats(&self, stats: &GateStats) {
        self.live_nonces.set(stats.live_nonces as i64);
        self.live_sessions.set(stats.sessions as i64);
        self.ledger_entries.set(stats.ledger_entries as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_prefixed() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.nonces_issued_total.inc();
        metrics
            .wallet_auth_failure_total
            .with_label_values(&["nonce_replayed"])
            .inc();
        metrics.observe_stats(&GateStats {
            live_nonces: 3,
            sessions: 2,
            ledger_entries: 1,
        });

        let text = metrics.encode().unwrap();
        assert!(text.contains("mystic_nonces_issued_total 1"));
        assert!(text.contains("mystic_wallet_auth_failure_total{reason=\"nonce_replayed\"} 1"));
        assert!(text.contains("mystic_live_nonces 3"));
        assert!(text.contains("mystic_ledger_entries 1"));
    }
}
