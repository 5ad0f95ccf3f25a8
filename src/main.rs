use caption_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgRequestStore},
    routes, shutdown,
    services::{queue::RedisCaptionQueue, storage::S3BlobStore},
    stages::{
        events::{spawn_supervisor, EventSink},
        ingestion::IngestionStage,
    },
    telemetry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing caption-pipeline intake server");

    let prometheus_handle =
        Arc::new(telemetry::install_recorder().expect("Failed to install Prometheus recorder"));

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object store client");
    let mut blobs = S3BlobStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_path_style,
    )
    .expect("Failed to initialize object store client");
    if let Some(base) = &config.public_base_url {
        blobs = blobs.with_public_base(base);
    }

    tracing::info!("Connecting to Redis caption queue");
    let queue = Arc::new(
        RedisCaptionQueue::new(&config.redis_url).expect("Failed to initialize caption queue"),
    );

    let store = Arc::new(PgRequestStore::new(db_pool));
    let (events, event_rx) = EventSink::channel();
    let supervisor = spawn_supervisor(event_rx);

    let ingestion = IngestionStage::new(store.clone(), Arc::new(blobs), queue.clone(), events)
        .with_embedded_photo(config.embed_photo_in_message);
    let state = AppState::new(store, queue, ingestion);
    let app = routes::router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let cancel = shutdown::install_signal_handler();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .expect("Server error");

    // The router (and with it every event sink) is gone; let the supervisor flush.
    let _ = supervisor.await;
    tracing::info!("Server stopped");
}
