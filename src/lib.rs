//! # Price Network
//!
//! Converts an amount of any asset symbol into any other by routing through
//! the markets that a set of price sources quote.
//!
//! Sources are exchanges (Bitfinex, Bittrex, Poloniex), a scraped listing site
//! (cryptoassetcharts.info), a static conversion table (`XBT = BTC`,
//! `1000 mNXT = 1 NXT`, ...) and virtual baskets priced from their
//! components. Every symbol is a node and every market an edge of one
//! undirected graph; a conversion follows the fewest-hops path and each hop
//! is priced as the mean of every source quoting it.
//!
//! ## Usage
//!
//! ```no_run
//! use price_network::{NetworkConfig, PriceNetwork};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = PriceNetwork::from_config(&NetworkConfig::from_env()?);
//!
//! // 2 XBT in USD: XBT -> BTC (Conversions) -> USD (exchanges)
//! let usd = network.price("XBT/USD", 2.0).await?;
//! println!("2 XBT = ${:.2}", usd);
//!
//! for symbol in network.get_symbols().await {
//!     println!("{}", symbol);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod network;
pub mod registry;
pub mod source;
pub mod sources;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheEntry, MemoryCache, QuoteCache};
pub use config::{Credentials, NetworkConfig};
pub use error::{CacheError, ConfigError, ConstructionError, PriceError, SourceError};
pub use graph::PriceGraph;
pub use metrics::SourceMetrics;
pub use network::PriceNetwork;
pub use registry::SourceRegistry;
pub use source::{PriceContext, PriceResolver, PriceSource};
pub use sources::{Basket, BasketSource, RateSpec, SourceKind};
pub use types::{ComponentHealth, HealthStatus, Market, ProviderStatus, Quote, Symbol};
