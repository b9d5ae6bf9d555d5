use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::{PharmaOpsError, Result};

/// Process exit codes used by the binary.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 2;
    pub const AUTH_ERROR: i32 = 3;
    pub const SCHEMA_MISMATCH: i32 = 4;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the wholesale marketplace.
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,
    /// Shared per-host request budget.
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_scheduler_concurrency")]
    pub scheduler_concurrency: usize,
    #[serde(default = "default_browser_concurrency")]
    pub browser_concurrency: usize,
    #[serde(default = "default_min_providers")]
    pub min_providers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_pool_size() -> u32 {
    10
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from(".pharma-ops/token.json")
}

fn default_rate_limit_rps() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_scheduler_concurrency() -> usize {
    3
}

fn default_browser_concurrency() -> usize {
    2
}

fn default_min_providers() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            scheduler_concurrency: default_scheduler_concurrency(),
            browser_concurrency: default_browser_concurrency(),
            min_providers: default_min_providers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for the closed knob set.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PHARMA_OPS_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_UPSTREAM_BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_UPSTREAM_USERNAME") {
            self.upstream.username = v;
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_UPSTREAM_PASSWORD") {
            self.upstream.password = v;
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_TOKEN_CACHE_PATH") {
            self.upstream.token_cache_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_SCHEDULER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.crawl.scheduler_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_BROWSER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.crawl.browser_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_MIN_PROVIDERS") {
            if let Ok(n) = v.parse() {
                self.crawl.min_providers = n;
            }
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_RATE_LIMIT_RPS") {
            if let Ok(n) = v.parse() {
                self.upstream.rate_limit_rps = n;
            }
        }
        if let Ok(v) = std::env::var("PHARMA_OPS_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(PharmaOpsError::config("database URL cannot be empty"));
        }
        if self.upstream.base_url.is_empty() {
            return Err(PharmaOpsError::config("upstream base URL cannot be empty"));
        }
        if url::Url::parse(&self.upstream.base_url).is_err() {
            return Err(PharmaOpsError::config(format!(
                "upstream base URL is not a valid URL: {}",
                self.upstream.base_url
            )));
        }
        if self.upstream.rate_limit_rps == 0 {
            return Err(PharmaOpsError::config("rate limit must be at least 1 rps"));
        }
        if self.crawl.scheduler_concurrency == 0 || self.crawl.browser_concurrency == 0 {
            return Err(PharmaOpsError::config(
                "concurrency limits must be at least 1",
            ));
        }
        Ok(())
    }
}
