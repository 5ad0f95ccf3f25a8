use serde::Deserialize;
use std::time::Duration;

/// Settings shared by every stage binary.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Only used by the intake server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the caption queue
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Object store bucket name
    pub s3_bucket: String,

    /// S3-compatible endpoint URL (R2, MinIO, AWS)
    pub s3_endpoint: String,

    /// Access key ID
    pub s3_access_key: String,

    /// Secret access key
    pub s3_secret_key: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint` (MinIO).
    #[serde(default)]
    pub s3_path_style: bool,

    /// Host used in result URLs when it differs from the API endpoint.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Carry photo bytes in queue messages instead of re-reading the object store.
    #[serde(default)]
    pub embed_photo_in_message: bool,

    /// Prometheus listener for the worker binaries. Unset disables it.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

/// `CAPTIONER_*` settings.
#[derive(Debug, Deserialize)]
pub struct CaptionerConfig {
    /// Image-to-text inference endpoint
    pub api_url: String,
    pub api_token: String,
    #[serde(default = "default_caption_timeout_secs")]
    pub timeout_secs: u64,
    /// Deliveries handled concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Longest single wait on the queue before re-checking for shutdown
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

fn default_caption_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    1
}

fn default_poll_secs() -> u64 {
    5
}

impl CaptionerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("CAPTIONER_").from_env()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

/// `GENERATOR_*` settings.
#[derive(Debug, Deserialize)]
pub struct GeneratorConfig {
    /// Text-to-image inference endpoint
    pub api_url: String,
    pub api_token: String,
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between scans for ready requests
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Records of one batch processed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_generate_timeout_secs() -> u64 {
    120
}

fn default_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    crate::stages::generation::DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    4
}

impl GeneratorConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("GENERATOR_").from_env()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// `MAILER_*` settings for requester notifications.
#[derive(Debug, Deserialize)]
pub struct MailerConfig {
    #[serde(default = "default_mailer_api_url")]
    pub api_url: String,
    pub api_token: String,
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_mailer_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mailer_api_url() -> String {
    "https://api.mailersend.com/v1".to_string()
}

fn default_from_name() -> String {
    "Caption Pipeline".to_string()
}

fn default_mailer_timeout_secs() -> u64 {
    5
}

impl MailerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("MAILER_").from_env()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn app_config_fills_defaults() {
        let config: AppConfig = envy::from_iter(vars(&[
            ("DATABASE_URL", "postgres://localhost/pipeline"),
            ("S3_BUCKET", "images"),
            ("S3_ENDPOINT", "http://localhost:9000"),
            ("S3_ACCESS_KEY", "minio"),
            ("S3_SECRET_KEY", "minio123"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.s3_region, "auto");
        assert!(!config.s3_path_style);
        assert!(!config.embed_photo_in_message);
        assert_eq!(config.public_base_url, None);
    }

    #[test]
    fn app_config_requires_the_database() {
        let err = envy::from_iter::<_, AppConfig>(vars(&[("S3_BUCKET", "images")])).unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn generator_config_defaults_to_five_second_ticks() {
        let config: GeneratorConfig = envy::prefixed("GENERATOR_")
            .from_iter(vars(&[
                ("GENERATOR_API_URL", "https://hf.example/t2i"),
                ("GENERATOR_API_TOKEN", "t"),
            ]))
            .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn mailer_config_bounds_the_notification_call() {
        let config: MailerConfig = envy::prefixed("MAILER_")
            .from_iter(vars(&[
                ("MAILER_API_TOKEN", "t"),
                ("MAILER_FROM_EMAIL", "noreply@pipeline.dev"),
            ]))
            .unwrap();

        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.api_url, "https://api.mailersend.com/v1");
    }

    #[test]
    fn captioner_config_overrides() {
        let config: CaptionerConfig = envy::prefixed("CAPTIONER_")
            .from_iter(vars(&[
                ("CAPTIONER_API_URL", "https://hf.example/i2t"),
                ("CAPTIONER_API_TOKEN", "t"),
                ("CAPTIONER_WORKERS", "8"),
                ("CAPTIONER_POLL_SECS", "2"),
            ]))
            .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.poll(), Duration::from_secs(2));
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }
}
