use caption_pipeline::{
    config::{AppConfig, CaptionerConfig},
    db::{self, PgRequestStore},
    services::{captioning::HuggingFaceCaptioner, queue::RedisCaptionQueue, storage::S3BlobStore},
    shutdown,
    stages::{
        captioning::CaptioningStage,
        events::{spawn_supervisor, EventSink},
    },
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting caption worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let captioner_config = CaptionerConfig::from_env().expect("Failed to load CAPTIONER_ configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be host:port");
        telemetry::install_listener(addr).expect("Failed to start Prometheus listener");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let blobs = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_path_style,
    )
    .expect("Failed to initialize object store client");

    let queue = RedisCaptionQueue::new(&config.redis_url).expect("Failed to initialize caption queue");

    let captioner = HuggingFaceCaptioner::new(
        &captioner_config.api_url,
        &captioner_config.api_token,
        captioner_config.timeout(),
    )
    .expect("Failed to initialize captioning client");

    let (events, event_rx) = EventSink::channel();
    let supervisor = spawn_supervisor(event_rx);

    let stage = Arc::new(
        CaptioningStage::new(
            Arc::new(PgRequestStore::new(db_pool)),
            Arc::new(blobs),
            Arc::new(queue),
            Arc::new(captioner),
            events,
        )
        .with_workers(captioner_config.workers)
        .with_poll_interval(captioner_config.poll()),
    );

    tracing::info!("Worker ready, consuming caption queue");
    stage.run(shutdown::install_signal_handler()).await;

    let _ = supervisor.await;
    tracing::info!("Caption worker stopped");
}
