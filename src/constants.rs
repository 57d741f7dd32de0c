//! Constants for the price network
//!
//! Compile-time defaults. Every value here can be overridden at runtime
//! through [`NetworkConfig`](crate::config::NetworkConfig).

/// How long a resolved pair price stays fresh in the quote cache (in seconds)
pub const CACHE_PRICE_EXPIRATION_SECS: u64 = 60;

/// How long an exchange adapter keeps its symbol/market/ticker snapshot (in seconds)
pub const PRICE_UPDATE_INTERVAL_SECS: u64 = 60;

/// HTTP request timeout when talking to a remote source (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Capacity of the quote broadcast channel
pub const QUOTE_CHANNEL_CAPACITY: usize = 1024;

/// Sources instantiated when no explicit list is configured
pub const DEFAULT_PRICE_SOURCES: &[&str] = &[
    "Bitfinex",
    "Bittrex",
    "Poloniex",
    "Conversions",
    "CryptoAssetCharts",
];

/// Base symbols a basket source prices against; the first one is the pricing base
pub const DEFAULT_BASKET_BASE_SYMBOLS: &[&str] = &["BTC", "USD"];

/// Prefix for assets scraped from listing sites so they never collide with exchange tickers
pub const SCRAPED_SYMBOL_PREFIX: &str = "_";

/// Bitfinex REST API base URL
pub const BITFINEX_API_URL: &str = "https://api.bitfinex.com";

/// Bittrex REST API base URL
pub const BITTREX_API_URL: &str = "https://bittrex.com";

/// Poloniex REST API base URL
pub const POLONIEX_API_URL: &str = "https://poloniex.com";

/// cryptoassetcharts.info asset listing page
pub const ASSET_CHARTS_URL: &str = "http://cryptoassetcharts.info/assets/info";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "price-network/0.1.0";
