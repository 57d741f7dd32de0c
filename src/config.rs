//! Runtime configuration for the price network
//!
//! Defaults come from [`constants`](crate::constants). A config can be
//! loaded from a JSON document or from the environment:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `PRICE_SOURCES` | comma separated source names, in order |
//! | `PRICE_CACHE_TTL_SECS` | quote cache TTL |
//! | `PRICE_UPDATE_INTERVAL_SECS` | exchange snapshot refresh interval |
//! | `PRICE_REQUEST_TIMEOUT_SECS` | HTTP request timeout |
//! | `<SOURCE>_API_KEY` / `<SOURCE>_API_SECRET` | credentials for a source |

use crate::{
    constants::{
        CACHE_PRICE_EXPIRATION_SECS, DEFAULT_BASKET_BASE_SYMBOLS, DEFAULT_PRICE_SOURCES,
        PRICE_UPDATE_INTERVAL_SECS, REQUEST_TIMEOUT_SECS,
    },
    error::ConfigError,
    sources::SourceKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// API credentials for a source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Price network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Source names to instantiate, in order
    pub price_sources: Vec<String>,
    /// Quote cache time-to-live (seconds)
    pub cache_ttl_secs: u64,
    /// How long exchange adapters keep their snapshots (seconds)
    pub price_update_interval_secs: u64,
    /// HTTP request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Credentials keyed by source name
    pub credentials: HashMap<String, Credentials>,
    /// Extra or overriding static conversions, `"BASE/QUOTE": rate`
    pub conversions: BTreeMap<String, f64>,
    /// Basket definitions, `name: {symbol: weight}`
    pub baskets: BTreeMap<String, BTreeMap<String, f64>>,
    /// Base symbols baskets are quoted in; the first one is the pricing base
    pub basket_base_symbols: Vec<String>,
    /// Base URL overrides keyed by source name
    pub endpoints: HashMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            price_sources: DEFAULT_PRICE_SOURCES.iter().map(|s| s.to_string()).collect(),
            cache_ttl_secs: CACHE_PRICE_EXPIRATION_SECS,
            price_update_interval_secs: PRICE_UPDATE_INTERVAL_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            credentials: HashMap::new(),
            conversions: BTreeMap::new(),
            baskets: BTreeMap::new(),
            basket_base_symbols: DEFAULT_BASKET_BASE_SYMBOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            endpoints: HashMap::new(),
        }
    }
}

impl NetworkConfig {
    /// Parses a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds a config from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(sources) = lookup("PRICE_SOURCES") {
            config.price_sources = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secs) = parse_secs(&lookup, "PRICE_CACHE_TTL_SECS")? {
            config.cache_ttl_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "PRICE_UPDATE_INTERVAL_SECS")? {
            config.price_update_interval_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "PRICE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }

        for source in &config.price_sources {
            let prefix = source.to_uppercase();
            let key = lookup(&format!("{}_API_KEY", prefix));
            let secret = lookup(&format!("{}_API_SECRET", prefix));
            if let (Some(key), Some(secret)) = (key, secret) {
                // stored under the name the adapter looks itself up by
                let name = SourceKind::from_name(source)
                    .map(|kind| kind.name().to_string())
                    .unwrap_or_else(|| source.clone());
                config
                    .credentials
                    .insert(name, Credentials::new(key, secret));
            }
        }

        Ok(config)
    }

    /// Credentials configured for a source, if any
    ///
    /// Source names match case-insensitively, as they do in `price_sources`.
    pub fn credentials_for(&self, source: &str) -> Option<&Credentials> {
        self.credentials.get(source).or_else(|| {
            self.credentials
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(source))
                .map(|(_, credentials)| credentials)
        })
    }

    pub fn has_credentials(&self, source: &str) -> bool {
        self.credentials_for(source).is_some()
    }

    /// Base URL for a source, falling back to its default
    pub fn endpoint_or<'a>(&'a self, source: &str, default: &'a str) -> &'a str {
        self.endpoints.get(source).map(String::as_str).unwrap_or(default)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.price_update_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.price_sources.len(), DEFAULT_PRICE_SOURCES.len());
        assert_eq!(config.basket_base_symbols, vec!["BTC", "USD"]);
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = NetworkConfig::from_json(
            r#"{"price_sources": ["Conversions"], "cache_ttl_secs": 5,
                "conversions": {"FOO/BAR": 2.5}}"#,
        )
        .unwrap();
        assert_eq!(config.price_sources, vec!["Conversions"]);
        assert_eq!(config.cache_ttl_secs, 5);
        assert_eq!(config.conversions.get("FOO/BAR"), Some(&2.5));
        assert_eq!(config.request_timeout_secs, REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_lookup_reads_sources_and_credentials() {
        let env: HashMap<&str, &str> = [
            ("PRICE_SOURCES", "Poloniex, Conversions,"),
            ("PRICE_CACHE_TTL_SECS", "30"),
            ("POLONIEX_API_KEY", "key"),
            ("POLONIEX_API_SECRET", "secret"),
        ]
        .into_iter()
        .collect();

        let config = NetworkConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.price_sources, vec!["Poloniex", "Conversions"]);
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(
            config.credentials_for("Poloniex"),
            Some(&Credentials::new("key", "secret"))
        );
        assert!(!config.has_credentials("Conversions"));
    }

    #[test]
    fn test_credentials_keyed_by_source_name() {
        let env: HashMap<&str, &str> = [
            ("PRICE_SOURCES", "poloniex"),
            ("POLONIEX_API_KEY", "key"),
            ("POLONIEX_API_SECRET", "secret"),
        ]
        .into_iter()
        .collect();

        let config = NetworkConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert!(config.credentials.contains_key("Poloniex"));
        assert!(config.has_credentials("poloniex"));

        let from_json = NetworkConfig::from_json(
            r#"{"credentials": {"POLONIEX": {"api_key": "k", "api_secret": "s"}}}"#,
        )
        .unwrap();
        assert_eq!(
            from_json.credentials_for("Poloniex"),
            Some(&Credentials::new("k", "s"))
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let result = NetworkConfig::from_lookup(|k| {
            (k == "PRICE_UPDATE_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let printed = format!("{:?}", Credentials::new("key", "hunter2"));
        assert!(!printed.contains("hunter2"));
    }
}
