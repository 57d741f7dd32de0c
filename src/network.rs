//! Price network: routes a conversion across markets from many sources
//!
//! The network keeps a graph of every symbol and market its sources know.
//! A conversion takes the fewest-hops path through that graph and compounds
//! the aggregated price of each hop.

use crate::{
    cache::QuoteCache,
    config::NetworkConfig,
    error::PriceError,
    graph::PriceGraph,
    metrics::SourceMetrics,
    registry::SourceRegistry,
    source::{PriceContext, PriceResolver, PriceSource},
    types::{ComponentHealth, HealthStatus, Market, ProviderStatus, Quote, Symbol},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// Routes price requests through the market graph
///
/// # Example
/// ```no_run
/// use price_network::{NetworkConfig, PriceNetwork};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let network = PriceNetwork::from_config(&NetworkConfig::default());
/// let usd = network.get_price("XBT", "USD", 1.5).await?;
/// println!("1.5 XBT = {:.2} USD", usd);
/// # Ok(())
/// # }
/// ```
pub struct PriceNetwork {
    registry: Arc<SourceRegistry>,
    /// Built on first use
    graph: RwLock<Option<PriceGraph>>,
}

impl PriceNetwork {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            graph: RwLock::new(None),
        }
    }

    /// Creates a network over the sources named in `config`
    pub fn from_config(config: &NetworkConfig) -> Self {
        let cache = Arc::new(QuoteCache::new(config.cache_ttl()));
        Self::new(Arc::new(SourceRegistry::from_config(config, cache)))
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Registers a source and rebuilds the graph
    pub async fn add_source(&self, source: Arc<dyn PriceSource>) {
        self.registry.add_source(source).await;
        self.reinit().await;
    }

    /// Rebuilds the graph from the registry's current symbols and markets
    pub async fn reinit(&self) {
        let graph = self.build_graph().await;
        *self.graph.write().await = Some(graph);
    }

    async fn build_graph(&self) -> PriceGraph {
        let graph = PriceGraph::build(self.registry.symbols().await, self.registry.markets().await);
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built price graph"
        );
        graph
    }

    async fn ensure_graph(&self) {
        if self.graph.read().await.is_some() {
            return;
        }
        let graph = self.build_graph().await;
        let mut slot = self.graph.write().await;
        if slot.is_none() {
            *slot = Some(graph);
        }
    }

    /// Adds symbols the graph hasn't seen yet, with every market that
    /// touches them
    async fn discover(&self, missing: &[Symbol]) -> Result<(), PriceError> {
        let known = self.registry.symbols().await;
        if let Some(unknown) = missing.iter().find(|s| !known.contains(s)) {
            return Err(PriceError::UnknownSymbol(unknown.to_string()));
        }

        let markets = self.registry.markets().await;
        let mut slot = self.graph.write().await;
        let graph = slot.get_or_insert_with(PriceGraph::new);
        for symbol in missing {
            tracing::debug!(symbol = %symbol, "Adding newly discovered symbol to graph");
            graph.add_node(symbol.clone());
        }
        for market in &markets {
            if missing.contains(&market.base) || missing.contains(&market.quote) {
                graph.add_edge(market);
            }
        }
        Ok(())
    }

    /// Fewest-hops path of symbols from `from` to `to`
    pub async fn shortest_path(
        &self,
        from: &Symbol,
        to: &Symbol,
    ) -> Result<Vec<Symbol>, PriceError> {
        self.ensure_graph().await;

        let missing: Vec<Symbol> = {
            let slot = self.graph.read().await;
            [from, to]
                .into_iter()
                .filter(|s| !slot.as_ref().is_some_and(|g| g.contains(s)))
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            self.discover(&missing).await?;
        }

        let slot = self.graph.read().await;
        slot.as_ref()
            .and_then(|graph| graph.shortest_path(from, to))
            .ok_or_else(|| PriceError::no_path(from.as_str(), to.as_str()))
    }

    /// How much `to` one gets for `amount` of `from`
    pub async fn get_price(&self, from: &str, to: &str, amount: f64) -> Result<f64, PriceError> {
        let ctx = PriceContext::new().with_resolver(self);
        self.get_price_in(&ctx, &Symbol::new(from), &Symbol::new(to), amount)
            .await
    }

    /// Like [`get_price`](Self::get_price), giving up on any source that
    /// hasn't answered within `timeout` of the call
    pub async fn get_price_with_timeout(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timeout: Duration,
    ) -> Result<f64, PriceError> {
        let ctx = PriceContext::new()
            .with_resolver(self)
            .with_timeout(timeout);
        self.get_price_in(&ctx, &Symbol::new(from), &Symbol::new(to), amount)
            .await
    }

    /// Converts within an existing request context
    pub async fn get_price_in(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, PriceError> {
        if from == to || amount == 0.0 {
            return Ok(amount);
        }

        let path = self.shortest_path(from, to).await?;
        tracing::debug!(from = %from, to = %to, hops = path.len() - 1, "Routing conversion");

        let mut value = amount;
        for hop in path.windows(2) {
            value = self.registry.price(ctx, &hop[0], &hop[1], value).await?;
        }
        Ok(value)
    }

    /// Prices a `FROM/TO` pair string
    pub async fn price(&self, pair: &str, value: f64) -> Result<f64, PriceError> {
        let market = Market::parse(pair)?;
        let ctx = PriceContext::new().with_resolver(self);
        self.get_price_in(&ctx, &market.base, &market.quote, value)
            .await
    }

    /// Values each balance in `base`
    ///
    /// Returns `{asset: (balance, value)}`, leaving out zero balances and
    /// assets no source puts a usable price on.
    pub async fn get_prices(
        &self,
        balances: &BTreeMap<Symbol, f64>,
        base: &Symbol,
    ) -> Result<BTreeMap<Symbol, (f64, f64)>, PriceError> {
        let ctx = PriceContext::new().with_resolver(self);
        let mut prices = BTreeMap::new();
        for (asset, balance) in balances {
            if *balance == 0.0 {
                continue;
            }
            let value = match self.get_price_in(&ctx, asset, base, *balance).await {
                Ok(value) => value,
                Err(e @ PriceError::NoQuoteAvailable { .. }) => {
                    tracing::warn!(asset = %asset, error = %e, "Leaving unpriced asset out");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if value != 0.0 {
                prices.insert(asset.clone(), (*balance, value));
            }
        }
        Ok(prices)
    }

    /// Total value of `balances` in `base`
    pub async fn get_nav(
        &self,
        balances: &BTreeMap<Symbol, f64>,
        base: &Symbol,
    ) -> Result<f64, PriceError> {
        Ok(self
            .get_prices(balances, base)
            .await?
            .values()
            .map(|(_, value)| value)
            .sum())
    }

    /// Unit price of every given market (every known market if `None`)
    ///
    /// Markets that can't be priced are logged and left out.
    pub async fn get_all_prices(&self, markets: Option<Vec<Market>>) -> BTreeMap<Market, f64> {
        let markets = match markets {
            Some(markets) => markets,
            None => self.registry.markets().await,
        };

        let ctx = PriceContext::new().with_resolver(self);
        let mut prices = BTreeMap::new();
        for market in markets {
            match self.get_price_in(&ctx, &market.base, &market.quote, 1.0).await {
                Ok(price) => {
                    prices.insert(market, price);
                }
                Err(e) => {
                    tracing::warn!(market = %market, error = %e, "Failed to price market");
                }
            }
        }
        prices
    }

    pub async fn get_symbols(&self) -> Vec<Symbol> {
        self.registry.symbols().await
    }

    pub async fn get_base_symbols(&self) -> Vec<Symbol> {
        self.registry.base_symbols().await
    }

    pub async fn get_markets(&self) -> Vec<Market> {
        self.registry.markets().await
    }

    /// Markets listed by each source
    pub async fn get_market_sources(&self) -> BTreeMap<String, Vec<Market>> {
        self.registry.market_sources().await
    }

    pub async fn purge_cache(&self) {
        self.registry.cache().purge().await;
    }

    /// Every quote a source returns from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Quote> {
        self.registry.subscribe()
    }

    pub async fn source_metrics(&self) -> Vec<SourceMetrics> {
        self.registry.source_metrics().await
    }

    /// Starts a task that re-prices every known market each `interval`,
    /// keeping the quote cache warm
    pub fn spawn_updater(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let network = self.clone();

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs_f64(),
                "Starting price updater task"
            );

            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let prices = network.get_all_prices(None).await;
                tracing::debug!(count = prices.len(), "Refreshed market prices");
            }
        })
    }

    /// Perform a health check on the price network
    ///
    /// # Returns
    /// ComponentHealth: healthy when every source answers, degraded when
    /// some don't, unhealthy when none do
    pub async fn health_check(&self) -> ComponentHealth {
        let statuses = self.registry.probe().await;
        let healthy = statuses
            .values()
            .filter(|s| **s == ProviderStatus::Healthy)
            .count();

        let mut details = HashMap::new();
        details.insert("sources".to_string(), serde_json::json!(statuses));
        details.insert(
            "cache_entries".to_string(),
            serde_json::json!(self.registry.cache().len().await),
        );
        details.insert(
            "construction_warnings".to_string(),
            serde_json::json!(self
                .registry
                .warnings()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()),
        );

        let status = if healthy == 0 {
            HealthStatus::Unhealthy
        } else if healthy < statuses.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let message = match status {
            HealthStatus::Healthy => "All price sources are answering".to_string(),
            HealthStatus::Degraded => format!(
                "{} of {} price sources are not answering",
                statuses.len() - healthy,
                statuses.len()
            ),
            HealthStatus::Unhealthy if statuses.is_empty() => {
                "No price sources configured".to_string()
            }
            HealthStatus::Unhealthy => "No price source is answering".to_string(),
        };

        ComponentHealth {
            name: "price_network".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl PriceResolver for PriceNetwork {
    async fn resolve(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, PriceError> {
        self.get_price_in(ctx, from, to, amount).await
    }
}
