//! Bitfinex price source implementation

use crate::{
    config::NetworkConfig,
    constants::BITFINEX_API_URL,
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
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bitfinex pubticker response
#[derive(Debug, Deserialize)]
struct TickerResponse {
    last_price: String,
}

/// Pair codes as Bitfinex lists them (`btcusd`, `testbtc:testusd`)
#[derive(Debug)]
struct PairTable {
    /// market -> lowercase pair code
    codes: HashMap<Market, String>,
}

impl PairTable {
    fn from_codes(codes: Vec<String>) -> Self {
        let codes = codes
            .into_iter()
            .filter_map(|code| split_pair_code(&code).map(|market| (market, code.to_lowercase())))
            .collect();
        Self { codes }
    }

    fn symbols(&self) -> Vec<Symbol> {
        let symbols: BTreeSet<Symbol> = self
            .codes
            .keys()
            .flat_map(|m| [m.base.clone(), m.quote.clone()])
            .collect();
        symbols.into_iter().collect()
    }
}

/// Splits a pair code into a market. Six-letter codes are two tickers of
/// three; longer ones are separated by a colon.
fn split_pair_code(code: &str) -> Option<Market> {
    let (base, quote) = match code.split_once(':') {
        Some(parts) => parts,
        None if code.len() == 6 && code.is_ascii() => code.split_at(3),
        None => return None,
    };
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some(Market::new(Symbol::ticker(base), Symbol::ticker(quote)))
}

/// Bitfinex price source
pub struct BitfinexSource {
    client: Client,
    base_url: String,
    update_interval: Duration,
    pairs: Snapshot<PairTable>,
    /// pair code -> (last price, fetched at)
    tickers: Mutex<HashMap<String, (f64, Instant)>>,
}

impl BitfinexSource {
    pub const NAME: &'static str = "Bitfinex";

    /// Creates a new Bitfinex source
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        update_interval: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(Self::NAME, request_timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            update_interval,
            pairs: Snapshot::new(update_interval),
            tickers: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, SourceError> {
        Self::new(
            config.endpoint_or(Self::NAME, BITFINEX_API_URL),
            config.request_timeout(),
            config.update_interval(),
        )
    }

    async fn pair_table(&self) -> Result<std::sync::Arc<PairTable>, SourceError> {
        self.pairs
            .get_or_refresh(|| async {
                let url = format!("{}/v1/symbols", self.base_url);
                tracing::debug!(url = %url, "Fetching Bitfinex symbols");
                let codes: Vec<String> = fetch_json(Self::NAME, self.client.get(&url)).await?;
                Ok(PairTable::from_codes(codes))
            })
            .await
    }

    async fn last_price(&self, code: &str) -> Result<f64, SourceError> {
        let mut tickers = self.tickers.lock().await;
        if let Some((price, fetched_at)) = tickers.get(code) {
            if fetched_at.elapsed() < self.update_interval {
                return Ok(*price);
            }
        }

        let url = format!("{}/v1/pubticker/{}", self.base_url, code);
        let ticker: TickerResponse = fetch_json(Self::NAME, self.client.get(&url)).await?;
        // Bitfinex answers rate-limited requests with a non-numeric body
        let price = ticker
            .last_price
            .trim()
            .parse::<f64>()
            .map_err(|_| SourceError::throttled(Self::NAME))?;

        tickers.insert(code.to_string(), (price, Instant::now()));
        Ok(price)
    }
}

#[async_trait]
impl PriceSource for BitfinexSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.pair_table().await?.symbols())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(vec![Symbol::ticker("USD"), Symbol::ticker("BTC")])
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        let mut markets: Vec<Market> = self.pair_table().await?.codes.keys().cloned().collect();
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
        let table = self.pair_table().await?;
        check_symbols(Self::NAME, &table.symbols(), &[&from, &to])?;

        if from == to {
            return Ok(amount);
        }

        let (market, direction) =
            locate_market(Self::NAME, &from, &to, |m| table.codes.contains_key(m))?;
        let price = self.last_price(&table.codes[&market]).await?;
        Ok(direction.apply(price) * amount)
    }
}
