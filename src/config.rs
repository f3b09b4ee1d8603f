// Runtime configuration for the fetch pipeline
// Every knob the fetcher needs is passed in explicitly; nothing is read from global state.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const PLACEHOLDER_KEY: &str = "your_serpapi_key_here";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

// Upstream search API settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub engine: String,
    pub currency: String,
    pub language: String,
    pub country: String,
    pub deep_search: bool,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://serpapi.com/search.json".to_string(),
            api_key: String::new(),
            engine: "google_flights".to_string(),
            currency: "USD".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            deep_search: true,
            timeout_ms: 60_000,
        }
    }
}

// Call budget: the upstream caps calls per month and per hour
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub monthly_limit: u32,
    pub call_delay_ms: u64,
    pub warning_margin: u32,
    // How many outbound groups get a return-leg lookup
    pub enrich_top_n: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_limit: 250,
            call_delay_ms: 1200,
            warning_margin: 10,
            enrich_top_n: 5,
        }
    }
}

impl QuotaConfig {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".serp_cache.json"),
            ttl_hours: 12,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api: ApiConfig,
    pub quota: QuotaConfig,
    pub cache: CacheConfig,
    pub usage_path: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            quota: QuotaConfig::default(),
            cache: CacheConfig::default(),
            usage_path: PathBuf::from(".usage.json"),
        }
    }
}

impl SearchConfig {
    /// Build a configuration from the process environment, loading `.env` first when present.
    ///
    /// `SERPAPI_KEY` is required; everything else falls back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    // Split out so tests can feed variables without touching the real environment
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SearchConfig::default();

        let api_key = lookup("SERPAPI_KEY")
            .filter(|key| !key.trim().is_empty() && key != PLACEHOLDER_KEY)
            .ok_or_else(|| ConfigError::MissingVar("SERPAPI_KEY".to_string()))?;
        config.api.api_key = api_key;

        if let Some(limit) = lookup("SERPAPI_MONTHLY_LIMIT") {
            config.quota.monthly_limit = parse_var("SERPAPI_MONTHLY_LIMIT", &limit)?;
        }
        if let Some(delay) = lookup("SERPAPI_CALL_DELAY_MS") {
            config.quota.call_delay_ms = parse_var("SERPAPI_CALL_DELAY_MS", &delay)?;
        }
        if let Some(ttl) = lookup("SERPAPI_CACHE_TTL_HOURS") {
            config.cache.ttl_hours = parse_var("SERPAPI_CACHE_TTL_HOURS", &ttl)?;
        }
        if let Some(no_cache) = lookup("SERPAPI_NO_CACHE") {
            config.cache.enabled = !parse_flag("SERPAPI_NO_CACHE", &no_cache)?;
        }
        if let Some(path) = lookup("SERPAPI_CACHE_FILE") {
            config.cache.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SERPAPI_USAGE_FILE") {
            config.usage_path = PathBuf::from(path);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_match_free_tier() {
        let config = SearchConfig::default();
        assert_eq!(config.quota.monthly_limit, 250);
        assert_eq!(config.quota.call_delay(), Duration::from_millis(1200));
        assert_eq!(config.cache.ttl(), Duration::from_secs(12 * 3600));
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let result = SearchConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingVar(_))));

        let result = SearchConfig::from_lookup(lookup_from(&[("SERPAPI_KEY", PLACEHOLDER_KEY)]));
        assert!(matches!(result, Err(ConfigError::MissingVar(_))));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = SearchConfig::from_lookup(lookup_from(&[
            ("SERPAPI_KEY", "abc123"),
            ("SERPAPI_MONTHLY_LIMIT", "100"),
            ("SERPAPI_CALL_DELAY_MS", "0"),
            ("SERPAPI_NO_CACHE", "true"),
            ("SERPAPI_CACHE_FILE", "/tmp/cache.json"),
        ]))
        .unwrap();

        assert_eq!(config.api.api_key, "abc123");
        assert_eq!(config.quota.monthly_limit, 100);
        assert_eq!(config.quota.call_delay_ms, 0);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.path, PathBuf::from("/tmp/cache.json"));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let result = SearchConfig::from_lookup(lookup_from(&[
            ("SERPAPI_KEY", "abc123"),
            ("SERPAPI_MONTHLY_LIMIT", "lots"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
