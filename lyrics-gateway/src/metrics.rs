use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use lyrics_core::stats::Stats;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    account_usage_total: IntCounterVec,
    accounts_quarantined: IntGauge,
    accounts_disabled: IntGauge,
    accounts_available: IntGauge,
    breaker_open: IntGauge,
    pipeline_latency: Histogram,
    bearer_refresh_failures_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("lyrics_gateway_requests_total", "Lyrics requests grouped by outcome"),
            &["outcome"],
        )?;
        let account_usage_total = IntCounterVec::new(
            Opts::new("lyrics_gateway_account_usage_total", "Successful upstream calls per account"),
            &["account"],
        )?;
        let bearer_refresh_failures_total = IntCounterVec::new(
            Opts::new("lyrics_gateway_bearer_refresh_failures_total", "Bearer token refresh failures"),
            &["stage"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(account_usage_total.clone()))?;
        registry.register(Box::new(bearer_refresh_failures_total.clone()))?;

        let accounts_quarantined = IntGauge::with_opts(Opts::new(
            "lyrics_gateway_accounts_quarantined",
            "Number of accounts currently quarantined",
        ))?;
        let accounts_disabled = IntGauge::with_opts(Opts::new(
            "lyrics_gateway_accounts_disabled",
            "Number of accounts permanently disabled",
        ))?;
        let accounts_available = IntGauge::with_opts(Opts::new(
            "lyrics_gateway_accounts_available",
            "Number of accounts currently available for selection",
        ))?;
        let breaker_open = IntGauge::with_opts(Opts::new(
            "lyrics_gateway_breaker_open",
            "1 if the circuit breaker is currently open, else 0",
        ))?;
        registry.register(Box::new(accounts_quarantined.clone()))?;
        registry.register(Box::new(accounts_disabled.clone()))?;
        registry.register(Box::new(accounts_available.clone()))?;
        registry.register(Box::new(breaker_open.clone()))?;

        let pipeline_latency = Histogram::with_opts(HistogramOpts::new(
            "lyrics_gateway_pipeline_latency_seconds",
            "End-to-end latency of a request pipeline call",
        ))?;
        registry.register(Box::new(pipeline_latency.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            account_usage_total,
            accounts_quarantined,
            accounts_disabled,
            accounts_available,
            breaker_open,
            pipeline_latency,
            bearer_refresh_failures_total,
        })
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_account_usage(&self, account: &str) {
        self.account_usage_total.with_label_values(&[account]).inc();
    }

    pub fn record_bearer_refresh_failure(&self, stage: &str) {
        self.bearer_refresh_failures_total.with_label_values(&[stage]).inc();
    }

    pub fn set_accounts_quarantined(&self, count: i64) {
        self.accounts_quarantined.set(count);
    }

    pub fn set_accounts_disabled(&self, count: i64) {
        self.accounts_disabled.set(count);
    }

    pub fn set_accounts_available(&self, count: i64) {
        self.accounts_available.set(count);
    }

    pub fn set_breaker_open(&self, open: bool) {
        self.breaker_open.set(if open { 1 } else { 0 });
    }

    pub fn observe_pipeline_latency(&self, secs: f64) {
        self.pipeline_latency.observe(secs);
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}

/// Wires `lyrics-core`'s `Stats` seam to the Prometheus registry above,
/// so account-usage and bearer-refresh-failure counts recorded deep in
/// the core surface on `/metrics` without the core crate knowing
/// Prometheus exists.
pub struct PrometheusStats {
    metrics: Arc<GatewayMetrics>,
}

impl PrometheusStats {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        PrometheusStats { metrics }
    }
}

#[async_trait]
impl Stats for PrometheusStats {
    async fn record_account_usage(&self, account_name: &str) {
        self.metrics.record_account_usage(account_name);
    }

    async fn record_bearer_refresh_failure(&self, stage: &str) {
        self.metrics.record_bearer_refresh_failure(stage);
    }
}
