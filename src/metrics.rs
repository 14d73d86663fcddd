use axum::{http::header, response::IntoResponse, routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the static configuration gauges.
    pub fn init(daily_cap: u32, feed_count: usize) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        gauge!("digest_daily_cap").set(daily_cap as f64);
        gauge!("ingest_feed_sources").set(feed_count as f64);

        Ok(Self { handle })
    }

    /// `GET /metrics` in the Prometheus text format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let body = handle.render();
                async move { ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response() }
            }),
        )
    }
}
