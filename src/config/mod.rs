use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Label detection endpoint
    pub detector_url: String,

    /// Bearer token for the detection endpoint
    #[serde(default)]
    pub detector_api_token: Option<String>,

    /// Bucket holding uploads and annotated images
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Use path-style bucket addressing (MinIO and similar)
    #[serde(default)]
    pub s3_path_style: bool,

    /// Lifetime of presigned artifact URLs
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u32,

    /// How long a received message stays invisible before redelivery
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Upper bound for a single detector or storage call
    #[serde(default = "default_dependency_timeout_secs")]
    pub dependency_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of consumer loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Where the worker serves its Prometheus metrics, if anywhere
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_url_ttl_secs() -> u32 {
    3600
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_dependency_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.url_ttl_secs))
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("REDIS_URL", "redis://localhost"),
            ("DETECTOR_URL", "http://localhost:9000/detect"),
            ("S3_BUCKET", "images"),
            ("S3_ENDPOINT", "http://localhost:9001"),
            ("S3_ACCESS_KEY", "key"),
            ("S3_SECRET_KEY", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let config: AppConfig = envy::from_iter(required()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.s3_region, "auto");
        assert!(!config.s3_path_style);
        assert!(config.detector_api_token.is_none());
        assert_eq!(config.url_ttl(), Duration::from_secs(3600));
        assert_eq!(config.visibility_timeout(), Duration::from_secs(300));
        assert_eq!(config.dependency_timeout(), Duration::from_secs(30));
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.worker_metrics_addr.is_none());
    }

    #[test]
    fn test_missing_required_key_fails() {
        let vars = required().into_iter().filter(|(k, _)| k != "DETECTOR_URL");
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
