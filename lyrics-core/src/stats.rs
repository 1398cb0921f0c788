use async_trait::async_trait;

/// External usage-counting sink. Grounded on the teacher's
/// `RateLimiterEngine` trait shape (a small async trait at the seam
/// between the core and whatever records metrics). The gateway supplies
/// a `PrometheusStats` implementation; `lyrics-core` itself stays free
/// of any metrics-crate dependency.
#[async_trait]
pub trait Stats: Send + Sync {
    async fn record_account_usage(&self, account_name: &str);
    async fn record_bearer_refresh_failure(&self, stage: &str);
}

#[derive(Default)]
pub struct NoopStats;

#[async_trait]
impl Stats for NoopStats {
    async fn record_account_usage(&self, _account_name: &str) {}
    async fn record_bearer_refresh_failure(&self, _stage: &str) {}
}
