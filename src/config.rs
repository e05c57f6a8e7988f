use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database holding cached verdicts
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://verdicts.db")]
    pub database_url: String,

    /// Base URL of the Cloud Vision REST API
    #[arg(
        long,
        env = "VISION_ENDPOINT",
        default_value = "https://vision.googleapis.com/v1"
    )]
    pub vision_endpoint: String,

    /// API key sent as the `key` query parameter
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    /// OAuth access token sent as a bearer token
    #[arg(long, env = "GOOGLE_VISION_ACCESS_TOKEN", hide_env_values = true)]
    pub vision_access_token: Option<String>,

    /// Timeout in milliseconds for one whole classifier call
    #[arg(long, env = "CLASSIFIER_TIMEOUT_MS", default_value = "30000")]
    pub classifier_timeout_ms: u64,

    /// Maximum images per annotate request
    #[arg(long, env = "MAX_IMAGES_PER_CALL", default_value = "16")]
    pub max_images_per_call: usize,

    /// Maximum image fetches or annotate calls in flight per classifier call
    #[arg(long, env = "MAX_CONCURRENT_FETCHES", default_value = "8")]
    pub max_concurrent_fetches: usize,

    /// Largest image accepted, in bytes
    #[arg(long, env = "MAX_IMAGE_BYTES", default_value = "7340032")]
    pub max_image_bytes: usize,

    /// Budget for base64 image content in one annotate request, in bytes
    #[arg(long, env = "MAX_REQUEST_BYTES", default_value = "10000000")]
    pub max_request_bytes: usize,

    /// Allow fetching images from loopback, private and link-local hosts
    #[arg(long, env = "ALLOW_PRIVATE_HOSTS")]
    pub allow_private_hosts: bool,

    /// maxResults for the safe-search feature
    #[arg(long, env = "SAFE_SEARCH_MAX_RESULTS", default_value = "5")]
    pub max_results: u32,

    /// Timeout in milliseconds for one /filter request
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "60000")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub max_images_per_call: usize,
    pub max_concurrent_fetches: usize,
    pub max_image_bytes: usize,
    pub max_request_bytes: usize,
    pub allow_private_hosts: bool,
    pub max_results: u32,
}

impl From<&Config> for VisionConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.vision_endpoint.trim_end_matches('/').to_string(),
            api_key: config.vision_api_key.clone(),
            access_token: config.vision_access_token.clone(),
            timeout: Duration::from_millis(config.classifier_timeout_ms),
            max_images_per_call: config.max_images_per_call.max(1),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            max_image_bytes: config.max_image_bytes,
            max_request_bytes: config.max_request_bytes,
            allow_private_hosts: config.allow_private_hosts,
            max_results: config.max_results,
        }
    }
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn has_vision_credentials(&self) -> bool {
        self.vision_api_key.is_some() || self.vision_access_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_derived_vision_config() {
        let config = Config::parse_from([
            "safesearch-filter",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--classifier-timeout-ms",
            "30000",
            "--max-results",
            "5",
            "--vision-api-key",
            "secret",
            "--vision-endpoint",
            "http://localhost:9000/v1/",
            "--max-images-per-call",
            "0",
            "--max-concurrent-fetches",
            "0",
            "--max-image-bytes",
            "7340032",
        ]);
        assert_eq!(config.server_address(), "127.0.0.1:8080");
        assert!(config.has_vision_credentials());

        let vision = VisionConfig::from(&config);
        assert_eq!(vision.endpoint, "http://localhost:9000/v1");
        assert_eq!(vision.max_images_per_call, 1);
        assert_eq!(vision.timeout, Duration::from_millis(30000));
        assert_eq!(vision.max_results, 5);
        assert_eq!(vision.max_concurrent_fetches, 1);
        assert_eq!(vision.max_image_bytes, 7 * 1024 * 1024);
        assert!(!vision.allow_private_hosts);
    }
}
