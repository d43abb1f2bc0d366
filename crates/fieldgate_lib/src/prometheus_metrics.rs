use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use anyhow::Context;

// It's important to use the exported crate `prometheus_exporter::prometheus`
// instead of `prometheus`, as different versions of that crate have
// incompatible global registries.
use prometheus_exporter::prometheus;
use tracing::info;

use crate::config::Config;

pub struct PrometheusMetrics {
    /// Executed queries, by outcome (`ok`, `partial`, `rejected`, `timeout`,
    /// `cancelled`).
    pub queries: prometheus::IntCounterVec,
    pub batch_fetches: prometheus::IntCounterVec,
    pub field_errors: prometheus::IntCounterVec,
}

static METRICS: OnceLock<PrometheusMetrics> = OnceLock::new();

pub fn metrics() -> &'static PrometheusMetrics {
    METRICS.get_or_init(|| PrometheusMetrics::new(prometheus::default_registry().clone()))
}

impl PrometheusMetrics {
    fn new(registry: prometheus::Registry) -> Self {
        let queries = prometheus::register_int_counter_vec_with_registry!(
            "fieldgate_queries",
            "Number of executed queries",
            &["outcome"],
            registry
        )
        .unwrap();
        let batch_fetches = prometheus::register_int_counter_vec_with_registry!(
            "fieldgate_batch_fetches",
            "Number of grouped entity fetches",
            &["entity_type", "success"],
            registry
        )
        .unwrap();
        let field_errors = prometheus::register_int_counter_vec_with_registry!(
            "fieldgate_field_errors",
            "Number of field errors reported in responses",
            &["category"],
            registry
        )
        .unwrap();

        Self {
            queries,
            batch_fetches,
            field_errors,
        }
    }
}

/// Serves the process-wide counters at `/metrics`. The server stops when
/// this handle is dropped.
#[derive(Debug)]
pub struct PrometheusExporter {
    address: SocketAddr,
    _exporter: prometheus_exporter::Exporter,
}

impl PrometheusExporter {
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.prometheus_port));
        // Registered up front so that a scrape before the first query still
        // lists every counter.
        metrics();

        let mut builder = prometheus_exporter::Builder::new(address);
        builder.with_registry(prometheus::default_registry().clone());
        let exporter = builder
            .start()
            .with_context(|| format!("failed to serve metrics on {address}"))?;

        info!(%address, "Serving Prometheus metrics");
        Ok(Self {
            address,
            _exporter: exporter,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}
