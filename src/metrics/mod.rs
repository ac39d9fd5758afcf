// metrics/mod.rs
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Installs the global Prometheus recorder with its own scrape listener on
/// `port`. The returned handle also backs the `/metrics` route.
pub fn setup_metrics(port: u16) -> anyhow::Result<PrometheusHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install recorder: {}", e))?;
    tokio::spawn(exporter);

    metrics::describe_counter!(
        "rf_actions_total",
        "Device actions by method and result code"
    );
    metrics::describe_histogram!(
        "rf_transmit_seconds",
        metrics::Unit::Seconds,
        "Time spent writing a frame to a transceiver"
    );
    Ok(handle)
}
