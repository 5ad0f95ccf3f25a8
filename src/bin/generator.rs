use caption_pipeline::{
    config::{AppConfig, GeneratorConfig, MailerConfig},
    db::{self, PgRequestStore},
    services::{
        generation::HuggingFaceGenerator, notification::MailerSendNotifier, storage::S3BlobStore,
    },
    shutdown,
    stages::{
        events::{spawn_supervisor, EventSink},
        generation::GenerationStage,
        scheduler::PeriodicRunner,
    },
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let generator_config =
        GeneratorConfig::from_env().expect("Failed to load GENERATOR_ configuration");
    let mailer_config = MailerConfig::from_env().expect("Failed to load MAILER_ configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be host:port");
        telemetry::install_listener(addr).expect("Failed to start Prometheus listener");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
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

    let generator = HuggingFaceGenerator::new(
        &generator_config.api_url,
        &generator_config.api_token,
        generator_config.timeout(),
    )
    .expect("Failed to initialize generation client");

    let notifier = MailerSendNotifier::new(
        &mailer_config.api_url,
        &mailer_config.api_token,
        &mailer_config.from_email,
        &mailer_config.from_name,
        mailer_config.timeout(),
    )
    .expect("Failed to initialize notification client");

    let (events, event_rx) = EventSink::channel();
    let supervisor = spawn_supervisor(event_rx);

    let stage = Arc::new(
        GenerationStage::new(
            Arc::new(PgRequestStore::new(db_pool)),
            Arc::new(blobs),
            Arc::new(generator),
            Arc::new(notifier),
            events,
        )
        .with_batch_size(generator_config.batch_size)
        .with_concurrency(generator_config.concurrency),
    );

    let runner = PeriodicRunner::new("generation", generator_config.interval());
    let stats = stage.run(runner, shutdown::install_signal_handler()).await;

    let _ = supervisor.await;
    tracing::info!(
        cycles = stats.cycles,
        failed_cycles = stats.failed_cycles,
        "Generation worker stopped"
    );
}
