//! Logging and metrics setup for the binary.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The kube client and its HTTP stack are chatty at `info`.
const DEFAULT_FILTER: &str = "info,kube=warn,tower=warn,hyper=warn";

const LATENCY_BUCKETS_MS: &[f64] = &[5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counter,
    Gauge,
    HistogramMs,
}

const METRICS: &[(&str, Kind, &str)] = &[
    ("reconcile_cycles_total", Kind::Counter, "AdvDeployment reconcile cycles run"),
    ("reconcile_errors_total", Kind::Counter, "reconcile cycles that ended in an error"),
    ("reconcile_latency_ms", Kind::HistogramMs, "wall time of one reconcile cycle"),
    ("reconcile_queue_depth", Kind::Gauge, "keys waiting for a worker"),
    ("resource_created_total", Kind::Counter, "managed resources created"),
    ("resource_updated_total", Kind::Counter, "managed resources updated in place"),
    ("resource_recreated_total", Kind::Counter, "managed resources deleted and created after a rejected update"),
    ("resource_deleted_total", Kind::Counter, "managed resources deleted"),
    ("resource_in_sync_total", Kind::Counter, "resource reconciles that needed no write"),
    ("patch_stabilized_total", Kind::Counter, "patches that collapsed to a no-op after stabilization"),
    ("watch_events_total", Kind::Counter, "watch events forwarded as reconcile keys"),
];

fn filter_from(spec: Option<&str>) -> EnvFilter {
    spec.and_then(|s| EnvFilter::try_new(s).ok()).unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Logs go to stderr so `render`/`diff` output on stdout stays machine readable.
pub fn init_tracing() {
    let spec = std::env::var("KEEL_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(filter_from(spec.as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn describe() {
    for &(name, kind, help) in METRICS {
        match kind {
            Kind::Counter => describe_counter!(name, Unit::Count, help),
            Kind::Gauge => describe_gauge!(name, Unit::Count, help),
            Kind::HistogramMs => describe_histogram!(name, Unit::Milliseconds, help),
        }
    }
}

fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full("reconcile_latency_ms".to_string()), LATENCY_BUCKETS_MS)
        .context("latency buckets")?
        .install()
        .context("installing Prometheus exporter")?;
    describe();
    Ok(())
}

/// Serve controller metrics when `KEEL_METRICS_ADDR` names a listen address.
pub fn init_metrics() {
    let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") else { return };
    match addr.parse::<SocketAddr>() {
        Ok(sock) => match install_exporter(sock) {
            Ok(()) => info!(addr = %sock, metrics = METRICS.len(), "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = ?e, "metrics disabled"),
        },
        Err(_) => warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port"),
    }
}
