use std::collections::HashMap;
use std::env;
use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::scheduler::ConcurrencyProfile;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RpcSettings {
    /// Timeout applied to every individual RPC/contract call.
    pub request_timeout_ms: u64,
    /// Timeout applied to one chain's whole balance fetch.
    pub chain_fetch_timeout_ms: u64,
    /// Optional endpoint replacement per chain, keyed by chain id.
    pub endpoint_overrides: HashMap<String, Vec<String>>,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            chain_fetch_timeout_ms: default_chain_fetch_timeout_ms(),
            endpoint_overrides: HashMap::new(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    8_000
}
fn default_chain_fetch_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerSettings {
    /// "sequential" or "bounded_parallel".
    pub profile: String,
    pub inter_chain_delay_ms: u64,
    pub max_concurrent_chains: usize,
    /// Retries only apply on the sequential (constrained) profile.
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            profile: "bounded_parallel".to_string(),
            inter_chain_delay_ms: default_inter_chain_delay_ms(),
            max_concurrent_chains: default_max_concurrent_chains(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_inter_chain_delay_ms() -> u64 {
    250
}
fn default_max_concurrent_chains() -> usize {
    3
}
fn default_retry_attempts() -> usize {
    2
}
fn default_retry_backoff_ms() -> u64 {
    250
}

impl SchedulerSettings {
    pub fn concurrency_profile(&self) -> ConcurrencyProfile {
        match self.profile.as_str() {
            "sequential" => ConcurrencyProfile::Sequential {
                inter_chain_delay: Duration::from_millis(self.inter_chain_delay_ms),
            },
            _ => ConcurrencyProfile::BoundedParallel {
                batch_size: self.max_concurrent_chains.max(1),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PriceSettings {
    pub quote_ttl_seconds: u64,
    /// Short TTL for Unavailable results so new listings recover quickly.
    pub unavailable_ttl_seconds: u64,
    pub api_base_url: String,
    pub api_timeout_ms: u64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            quote_ttl_seconds: default_quote_ttl_seconds(),
            unavailable_ttl_seconds: default_unavailable_ttl_seconds(),
            api_base_url: default_price_api_base_url(),
            api_timeout_ms: default_price_api_timeout_ms(),
        }
    }
}

fn default_quote_ttl_seconds() -> u64 {
    60
}
fn default_unavailable_ttl_seconds() -> u64 {
    10
}
fn default_price_api_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_price_api_timeout_ms() -> u64 {
    1_500
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendSettings {
    /// Aggregation backend base URL; the backend path is disabled when unset.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

fn default_backend_timeout_ms() -> u64 {
    4_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub block_number_ttl_seconds: u64,
    pub block_ttl_seconds: u64,
    pub receipt_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            block_number_ttl_seconds: 12,
            block_ttl_seconds: 30,
            receipt_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub scheduler: SchedulerSettings,
    pub price: PriceSettings,
    pub backend: BackendSettings,
    pub cache: CacheSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` when present, otherwise the built-in defaults,
    /// then applies targeted environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;
        let mut settings: Self = s.try_deserialize()?;

        if let Ok(url) = env::var("SDK_BACKEND_API_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                settings.backend.base_url = Some(trimmed.to_string());
            }
        }
        if let Ok(url) = env::var("SDK_PRICE_API_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                settings.price.api_base_url = trimmed.to_string();
            }
        }

        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.request_timeout_ms)
    }

    pub fn chain_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.chain_fetch_timeout_ms)
    }
}

/// Initializes env_logger from the configured level; RUST_LOG wins when set.
pub fn init_logging(log: &LogSettings) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&log.level);
    if let Ok(rust_log) = env::var("RUST_LOG") {
        builder.parse_filters(&rust_log);
    }
    builder.try_init().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ttls() {
        let settings = Settings::default();
        assert_eq!(settings.price.quote_ttl_seconds, 60);
        assert_eq!(settings.price.unavailable_ttl_seconds, 10);
        assert_eq!(settings.cache.block_number_ttl_seconds, 12);
        assert_eq!(settings.cache.block_ttl_seconds, 30);
        assert_eq!(settings.cache.receipt_ttl_seconds, 60);
        assert!(settings.backend.base_url.is_none());
    }

    #[test]
    fn scheduler_profile_parses_both_strategies() {
        let mut settings = SchedulerSettings::default();
        assert!(matches!(
            settings.concurrency_profile(),
            ConcurrencyProfile::BoundedParallel { batch_size: 3 }
        ));

        settings.profile = "sequential".to_string();
        settings.inter_chain_delay_ms = 300;
        match settings.concurrency_profile() {
            ConcurrencyProfile::Sequential { inter_chain_delay } => {
                assert_eq!(inter_chain_delay, Duration::from_millis(300));
            }
            other => panic!("expected sequential profile, got {:?}", other),
        }
    }
}
