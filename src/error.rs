//! Error types for the price network

use thiserror::Error;

/// Errors a single price source can return
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// The source does not know this symbol
    #[error("{source_name}: no such symbol {symbol}")]
    UnknownSymbol { source_name: String, symbol: String },

    /// Both symbols are known but the source quotes neither direction of the pair
    #[error("{source_name}: missing market {market}")]
    MissingMarket { source_name: String, market: String },

    /// Network failure, timeout or unparseable response
    #[error("{source_name}: source unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Rate limit exceeded
    #[error("{source_name}: throttled")]
    Throttled { source_name: String },
}

impl SourceError {
    /// Creates an UnknownSymbol error
    pub fn unknown_symbol(source_name: &str, symbol: impl Into<String>) -> Self {
        Self::UnknownSymbol {
            source_name: source_name.to_string(),
            symbol: symbol.into(),
        }
    }

    /// Creates a MissingMarket error
    pub fn missing_market(source_name: &str, market: impl Into<String>) -> Self {
        Self::MissingMarket {
            source_name: source_name.to_string(),
            market: market.into(),
        }
    }

    /// Creates an Unavailable error
    pub fn unavailable(source_name: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a Throttled error
    pub fn throttled(source_name: &str) -> Self {
        Self::Throttled {
            source_name: source_name.to_string(),
        }
    }

    /// Maps a transport error. Timeouts and connection failures are both
    /// reported as an unavailable source.
    pub fn from_transport(source_name: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::unavailable(source_name, "request timed out")
        } else {
            Self::unavailable(source_name, err.to_string())
        }
    }

    /// True for failures that may clear up on their own (unavailable or throttled)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Throttled { .. })
    }
}

/// Errors returned when resolving a price through the network
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriceError {
    /// No live source reports this symbol
    #[error("Unknown symbol {0}")]
    UnknownSymbol(String),

    /// The price graph has no path between the two symbols
    #[error("No path from {from} to {to}")]
    NoPath { from: String, to: String },

    /// Every queried source failed and nothing usable was cached
    #[error("Couldn't determine price of {market}")]
    NoQuoteAvailable { market: String },

    /// A pair string that is not exactly `FROM/TO`
    #[error("Invalid trade pair: {0:?}")]
    InvalidPair(String),

    /// Error raised by a single source outside of aggregation
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl PriceError {
    /// Creates a NoPath error
    pub fn no_path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoPath {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a NoQuoteAvailable error
    pub fn no_quote(market: impl Into<String>) -> Self {
        Self::NoQuoteAvailable {
            market: market.into(),
        }
    }

    /// Whether retrying the same request later could succeed
    ///
    /// Missing data (unknown symbols, disconnected graph, malformed pairs)
    /// will not fix itself; upstream outages might.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoQuoteAvailable { .. } => true,
            Self::Source(e) => e.is_transient(),
            Self::UnknownSymbol(_) | Self::NoPath { .. } | Self::InvalidPair(_) => false,
        }
    }
}

/// Non-fatal failures collected while building a registry
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("failed to construct source {name}: {reason}")]
    AdapterConstructionFailed { name: String, reason: String },
}

impl ConstructionError {
    pub fn adapter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AdapterConstructionFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors loading a [`NetworkConfig`](crate::config::NetworkConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON document
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds a value of the wrong shape
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Errors from a quote cache backend
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("cache backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },
}
