//! Poloniex price source implementation

use crate::{
    config::{Credentials, NetworkConfig},
    constants::POLONIEX_API_URL,
    error::SourceError,
    source::{check_symbols, locate_market, PriceContext, PriceSource},
    sources::{
        http::{build_client, fetch_json},
        snapshot::Snapshot,
    },
    types::{Market, Symbol},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// One entry of the returnTicker response
#[derive(Debug, Deserialize)]
struct TickerEntry {
    last: String,
}

/// Last prices keyed by market
///
/// Poloniex names pairs `QUOTE_BASE` (`BTC_ETH` is ETH priced in BTC).
#[derive(Debug, Default)]
struct Ticker {
    last: HashMap<Market, f64>,
    base_symbols: BTreeSet<Symbol>,
}

impl Ticker {
    fn parse(raw: HashMap<String, TickerEntry>) -> Self {
        let mut ticker = Ticker::default();
        for (code, entry) in raw {
            let Some((quote, base)) = code.split_once('_') else {
                continue;
            };
            let Ok(last) = entry.last.trim().parse::<f64>() else {
                tracing::debug!(
                    pair = %code,
                    value = %entry.last,
                    "Skipping unparseable Poloniex price"
                );
                continue;
            };
            let (base, quote) = (Symbol::ticker(base), Symbol::ticker(quote));
            ticker.base_symbols.insert(quote.clone());
            ticker.last.insert(Market::new(base, quote), last);
        }
        ticker
    }

    fn symbols(&self) -> Vec<Symbol> {
        let symbols: BTreeSet<Symbol> = self
            .last
            .keys()
            .flat_map(|m| [m.base.clone(), m.quote.clone()])
            .collect();
        symbols.into_iter().collect()
    }
}

/// Poloniex price source
///
/// The whole ticker is fetched in one request and memoized for the update
/// interval; symbols, markets and prices are all read off that snapshot.
pub struct PoloniexSource {
    client: Client,
    base_url: String,
    credentials: Credentials,
    ticker: Snapshot<Ticker>,
}

impl PoloniexSource {
    pub const NAME: &'static str = "Poloniex";

    /// Creates a new Poloniex source
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        request_timeout: Duration,
        update_interval: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(Self::NAME, request_timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            ticker: Snapshot::new(update_interval),
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, SourceError> {
        let credentials = config
            .credentials_for(Self::NAME)
            .cloned()
            .ok_or_else(|| SourceError::unavailable(Self::NAME, "missing API credentials"))?;
        Self::new(
            config.endpoint_or(Self::NAME, POLONIEX_API_URL),
            credentials,
            config.request_timeout(),
            config.update_interval(),
        )
    }

    async fn ticker(&self) -> Result<Arc<Ticker>, SourceError> {
        self.ticker
            .get_or_refresh(|| async {
                let url = format!("{}/public", self.base_url);
                tracing::debug!(url = %url, "Fetching Poloniex ticker");
                let request = self
                    .client
                    .get(&url)
                    .query(&[("command", "returnTicker")])
                    .header("Key", &self.credentials.api_key);
                let raw: HashMap<String, TickerEntry> = fetch_json(Self::NAME, request).await?;
                Ok(Ticker::parse(raw))
            })
            .await
    }
}

#[async_trait]
impl PriceSource for PoloniexSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.ticker().await?.symbols())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.ticker().await?.base_symbols.iter().cloned().collect())
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        let mut markets: Vec<Market> = self.ticker().await?.last.keys().cloned().collect();
        markets.sort();
        Ok(markets)
    }

    async fn price(
        &self,
        _ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError> {
        let (from, to) = (Symbol::ticker(from), Symbol::ticker(to));
        let ticker = self.ticker().await?;
        check_symbols(Self::NAME, &ticker.symbols(), &[&from, &to])?;

        if from == to {
            return Ok(amount);
        }

        let (market, direction) =
            locate_market(Self::NAME, &from, &to, |m| ticker.last.contains_key(m))?;
        Ok(direction.apply(ticker.last[&market]) * amount)
    }
}
