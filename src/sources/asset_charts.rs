//! Scrapes the cryptoassetcharts.info asset table for last prices

use crate::{
    config::NetworkConfig,
    constants::{ASSET_CHARTS_URL, SCRAPED_SYMBOL_PREFIX},
    error::SourceError,
    source::{check_symbols, locate_market, PriceContext, PriceSource},
    sources::{
        http::{build_client, fetch_text},
        snapshot::Snapshot,
    },
    types::{Market, Symbol},
};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Minimum number of cells in a price row
const MIN_COLUMNS: usize = 7;
const SYMBOL_COLUMN: usize = 1;
const PRICE_COLUMN: usize = 4;

/// Prices read off one page load
#[derive(Debug, Default)]
struct AssetTable {
    prices: BTreeMap<Market, f64>,
    assets: BTreeSet<Symbol>,
    base_symbols: BTreeSet<Symbol>,
}

impl AssetTable {
    /// Parses the `#tableAssets` table. Rows that are too short or whose price
    /// cell isn't `<number> <BASE>` are skipped.
    fn parse(html: &str) -> Result<Self, SourceError> {
        let document = Html::parse_document(html);
        let rows = selector("#tableAssets tr")?;
        let cells = selector("td")?;

        let mut table = AssetTable::default();
        for row in document.select(&rows) {
            let columns: Vec<String> = row
                .select(&cells)
                .map(|c| clean_text(&c.text().collect::<String>()))
                .collect();
            if columns.len() < MIN_COLUMNS {
                continue;
            }

            let Some((value, base)) = parse_price_cell(&columns[PRICE_COLUMN]) else {
                tracing::debug!(cell = %columns[PRICE_COLUMN], "Skipping unparseable price cell");
                continue;
            };
            let asset = Symbol::prefixed(SCRAPED_SYMBOL_PREFIX, &columns[SYMBOL_COLUMN]);
            let base = Symbol::new(base);

            table.assets.insert(asset.clone());
            table.base_symbols.insert(base.clone());
            table.prices.insert(Market::new(asset, base), value);
        }
        Ok(table)
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.assets
            .iter()
            .chain(self.base_symbols.iter())
            .cloned()
            .collect()
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| {
        SourceError::unavailable(
            AssetChartsSource::NAME,
            format!("bad selector {}: {}", css, e),
        )
    })
}

/// Folds the cell text to plain ASCII with single spaces
fn clean_text(raw: &str) -> String {
    let ascii: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(char::is_ascii)
        .collect();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses `"1,234.5 BTC"` into `(1234.5, "BTC")`
fn parse_price_cell(cell: &str) -> Option<(f64, &str)> {
    let mut parts = cell.split(' ');
    let number = parts.next()?.replace(',', "");
    let base = parts.next()?;
    if base.is_empty() {
        return None;
    }
    Some((number.parse().ok()?, base))
}

/// Scraped listing-site source
///
/// Asset symbols are prefixed with `_` so they never collide with the
/// identically named tickers of real exchanges.
pub struct AssetChartsSource {
    client: Client,
    url: String,
    table: Snapshot<AssetTable>,
}

impl AssetChartsSource {
    pub const NAME: &'static str = "CryptoAssetCharts";

    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        update_interval: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(Self::NAME, request_timeout)?,
            url: url.into(),
            table: Snapshot::new(update_interval),
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, SourceError> {
        Self::new(
            config.endpoint_or(Self::NAME, ASSET_CHARTS_URL),
            config.request_timeout(),
            config.update_interval(),
        )
    }

    async fn table(&self) -> Result<Arc<AssetTable>, SourceError> {
        self.table
            .get_or_refresh(|| async {
                tracing::debug!(url = %self.url, "Scraping asset table");
                let html = fetch_text(Self::NAME, self.client.get(&self.url)).await?;
                AssetTable::parse(&html)
            })
            .await
    }
}

#[async_trait]
impl PriceSource for AssetChartsSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.table().await?.symbols())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.table().await?.base_symbols.iter().cloned().collect())
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        Ok(self.table().await?.prices.keys().cloned().collect())
    }

    async fn price(
        &self,
        _ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError> {
        let table = self.table().await?;
        check_symbols(Self::NAME, &table.symbols(), &[from, to])?;

        if from == to {
            return Ok(amount);
        }

        let (market, direction) =
            locate_market(Self::NAME, from, to, |m| table.prices.contains_key(m))?;
        Ok(direction.apply(table.prices[&market]) * amount)
    }
}
