//! Types for the price network

use crate::error::PriceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Normalized asset code
///
/// Symbols are compared by their stored form. Exchange adapters store
/// uppercase tickers; scraped sources store prefixed names (`_FOO`); static
/// conversions keep the exact spelling they were configured with (`mNXT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol keeping its case (surrounding whitespace is trimmed)
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_string())
    }

    /// Create an exchange-native symbol, uppercased
    pub fn ticker(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    /// Create a symbol tagged with a source-private prefix
    pub fn prefixed(prefix: &str, symbol: impl AsRef<str>) -> Self {
        Self(format!("{}{}", prefix, symbol.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A tradable pair: `quote` units per one `base` unit is knowable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Market {
    pub base: Symbol,
    pub quote: Symbol,
}

impl Market {
    pub fn new(base: Symbol, quote: Symbol) -> Self {
        Self { base, quote }
    }

    /// Parses `BASE/QUOTE`, splitting on the first slash and trimming both sides
    pub fn parse(pair: &str) -> Result<Self, PriceError> {
        let (base, quote) = pair
            .split_once('/')
            .ok_or_else(|| PriceError::InvalidPair(pair.to_string()))?;
        let (base, quote) = (base.trim(), quote.trim());
        if base.is_empty() || quote.is_empty() {
            return Err(PriceError::InvalidPair(pair.to_string()));
        }
        Ok(Self::new(Symbol::new(base), Symbol::new(quote)))
    }

    /// The same pair in the opposite direction
    pub fn inverse(&self) -> Self {
        Self::new(self.quote.clone(), self.base.clone())
    }

    /// Cache / provenance key, `from/to`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// One source's price observation for a market
///
/// Quotes are broadcast to subscribers after every successful source query,
/// which is where a historical price store hooks in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub market: Market,
    /// Units of `market.quote` per one `market.base`
    pub price: f64,
    /// Amount multiplier the quote was requested for
    pub amount: f64,
    /// Name of the source that produced it
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(market: Market, price: f64, amount: f64, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            market,
            price,
            amount,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} = {} ({})",
            self.amount,
            self.market,
            self.price * self.amount,
            self.source
        )
    }
}

/// Provider status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Source answered
    Healthy,
    /// Source is rate limiting us
    Degraded,
    /// Source failed
    Unavailable,
}

/// Overall system health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// System is healthy and all components are operational
    Healthy,
    /// System is degraded but still functional
    Degraded,
    /// System is unhealthy and requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
