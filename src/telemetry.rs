use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Install the recorder and hand back a handle for a `/metrics` route.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Install the recorder with its own scrape listener (worker binaries).
pub fn install_listener(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "pipeline_stage_events_total",
        "Stage outcomes by stage, outcome and error kind"
    );
    metrics::describe_histogram!(
        "caption_processing_seconds",
        "Time to handle one caption queue delivery"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time to generate, store and announce one image"
    );
    metrics::describe_gauge!(
        "caption_queue_depth",
        "Messages waiting in the caption queue"
    );
}
