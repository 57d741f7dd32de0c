//! Price source adapters

pub mod asset_charts;
pub mod basket;
pub mod bitfinex;
pub mod bittrex;
pub mod conversions;
mod http;
pub mod poloniex;
pub mod snapshot;

pub use asset_charts::AssetChartsSource;
pub use basket::{Basket, BasketSource};
pub use bitfinex::BitfinexSource;
pub use bittrex::BittrexSource;
pub use conversions::{ConversionsSource, RateSpec};
pub use poloniex::PoloniexSource;

use crate::{config::NetworkConfig, error::SourceError, source::PriceSource};
use std::fmt;
use std::sync::Arc;

/// The adapters that can be instantiated by name from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Bitfinex,
    Bittrex,
    Poloniex,
    Conversions,
    CryptoAssetCharts,
    Baskets,
}

impl SourceKind {
    /// Looks a kind up by its configured name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bitfinex" => Some(Self::Bitfinex),
            "bittrex" => Some(Self::Bittrex),
            "poloniex" => Some(Self::Poloniex),
            "conversions" => Some(Self::Conversions),
            "cryptoassetcharts" => Some(Self::CryptoAssetCharts),
            "baskets" => Some(Self::Baskets),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bitfinex => BitfinexSource::NAME,
            Self::Bittrex => BittrexSource::NAME,
            Self::Poloniex => PoloniexSource::NAME,
            Self::Conversions => ConversionsSource::NAME,
            Self::CryptoAssetCharts => AssetChartsSource::NAME,
            Self::Baskets => BasketSource::NAME,
        }
    }

    /// Whether the adapter can only run with API credentials
    pub fn requires_credentials(&self) -> bool {
        matches!(self, Self::Bittrex | Self::Poloniex)
    }

    /// Instantiates the adapter from configuration
    pub fn build(&self, config: &NetworkConfig) -> Result<Arc<dyn PriceSource>, SourceError> {
        let source: Arc<dyn PriceSource> = match self {
            Self::Bitfinex => Arc::new(BitfinexSource::from_config(config)?),
            Self::Bittrex => Arc::new(BittrexSource::from_config(config)?),
            Self::Poloniex => Arc::new(PoloniexSource::from_config(config)?),
            Self::Conversions => Arc::new(ConversionsSource::with_overrides(&config.conversions)?),
            Self::CryptoAssetCharts => Arc::new(AssetChartsSource::from_config(config)?),
            Self::Baskets => Arc::new(BasketSource::from_config(config)?),
        };
        Ok(source)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
