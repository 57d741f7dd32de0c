//! Source registry: the set of live adapters and the aggregated pair price
//!
//! A pair price is the arithmetic mean of every source that quotes it. Which
//! sources quote a market is learned as they answer (provenance), so later
//! queries for that market only go to those sources.

use crate::{
    cache::QuoteCache,
    config::NetworkConfig,
    constants::QUOTE_CHANNEL_CAPACITY,
    error::{ConstructionError, PriceError, SourceError},
    metrics::{MetricsCollector, SourceMetrics},
    source::{PriceContext, PriceSource},
    sources::{BasketSource, SourceKind},
    types::{Market, ProviderStatus, Quote, Symbol},
};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};

/// Registry of live price sources
pub struct SourceRegistry {
    sources: RwLock<Vec<Arc<dyn PriceSource>>>,
    cache: Arc<QuoteCache>,
    /// market -> names of the sources that have quoted it
    provenance: RwLock<HashMap<Market, BTreeSet<String>>>,
    metrics: RwLock<HashMap<String, Arc<MetricsCollector>>>,
    quotes: broadcast::Sender<Quote>,
    warnings: Vec<ConstructionError>,
}

impl SourceRegistry {
    /// Creates an empty registry
    pub fn new(cache: Arc<QuoteCache>) -> Self {
        let (quotes, _) = broadcast::channel(QUOTE_CHANNEL_CAPACITY);
        Self {
            sources: RwLock::new(Vec::new()),
            cache,
            provenance: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            quotes,
            warnings: Vec::new(),
        }
    }

    /// Instantiates the configured sources, in order
    ///
    /// Sources that need credentials are skipped when none are configured.
    /// Unknown names and sources that fail to build are collected in
    /// [`warnings`](Self::warnings) instead of failing the whole registry.
    /// Configured baskets are registered even if `Baskets` isn't listed.
    pub fn from_config(config: &NetworkConfig, cache: Arc<QuoteCache>) -> Self {
        let mut registry = Self::new(cache);

        let mut names = config.price_sources.clone();
        let lists_baskets = names
            .iter()
            .any(|name| SourceKind::from_name(name) == Some(SourceKind::Baskets));
        if !config.baskets.is_empty() && !lists_baskets {
            names.push(BasketSource::NAME.to_string());
        }

        for name in &names {
            let Some(kind) = SourceKind::from_name(name) else {
                tracing::warn!(source = %name, "Unknown price source");
                registry
                    .warnings
                    .push(ConstructionError::adapter(name.as_str(), "unknown source"));
                continue;
            };

            if kind.requires_credentials() && !config.has_credentials(kind.name()) {
                tracing::info!(source = %kind, "No credentials configured, skipping source");
                continue;
            }

            match kind.build(config) {
                Ok(source) => {
                    tracing::debug!(source = %kind, "Price source ready");
                    registry.sources.get_mut().push(source);
                }
                Err(e) => {
                    tracing::warn!(source = %kind, error = %e, "Failed to construct price source");
                    registry
                        .warnings
                        .push(ConstructionError::adapter(kind.name(), e.to_string()));
                }
            }
        }

        registry
    }

    /// Problems met while building the registry from configuration
    pub fn warnings(&self) -> &[ConstructionError] {
        &self.warnings
    }

    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    /// Registers a source, replacing any source with the same name
    pub async fn add_source(&self, source: Arc<dyn PriceSource>) {
        let mut sources = self.sources.write().await;
        sources.retain(|s| s.name() != source.name());
        tracing::info!(source = source.name(), "Adding price source");
        sources.push(source);
    }

    /// The live sources, in registration order
    pub async fn sources(&self) -> Vec<Arc<dyn PriceSource>> {
        self.sources.read().await.clone()
    }

    /// Sorted union of every source's symbols
    pub async fn symbols(&self) -> Vec<Symbol> {
        let lists = join_all(self.sources().await.into_iter().map(|source| async move {
            let result = source.symbols().await;
            (source, result)
        }))
        .await;
        union(lists, "symbols")
    }

    /// Sorted union of every source's base symbols
    pub async fn base_symbols(&self) -> Vec<Symbol> {
        let lists = join_all(self.sources().await.into_iter().map(|source| async move {
            let result = source.base_symbols().await;
            (source, result)
        }))
        .await;
        union(lists, "base symbols")
    }

    /// Sorted union of every source's markets
    pub async fn markets(&self) -> Vec<Market> {
        let lists = join_all(self.sources().await.into_iter().map(|source| async move {
            let result = source.markets().await;
            (source, result)
        }))
        .await;
        union(lists, "markets")
    }

    /// Markets listed by each source, keyed by source name
    pub async fn market_sources(&self) -> BTreeMap<String, Vec<Market>> {
        let mut result = BTreeMap::new();
        for source in self.sources().await {
            match source.markets().await {
                Ok(mut markets) => {
                    markets.sort();
                    result.insert(source.name().to_string(), markets);
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Failed to list markets");
                }
            }
        }
        result
    }

    /// Names of the sources that have quoted `market`
    pub async fn provenance(&self, market: &Market) -> Vec<String> {
        self.provenance
            .read()
            .await
            .get(market)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Request metrics for every source queried so far
    pub async fn source_metrics(&self) -> Vec<SourceMetrics> {
        let collectors: Vec<Arc<MetricsCollector>> =
            self.metrics.read().await.values().cloned().collect();
        let mut metrics = join_all(collectors.iter().map(|c| c.snapshot())).await;
        metrics.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        metrics
    }

    /// Asks every source for its markets and reports who answered
    pub async fn probe(&self) -> BTreeMap<String, ProviderStatus> {
        let sources = self.sources().await;
        let results = join_all(sources.iter().map(|source| source.markets())).await;

        sources
            .iter()
            .zip(results)
            .map(|(source, result)| {
                let status = match result {
                    Ok(_) => ProviderStatus::Healthy,
                    Err(SourceError::Throttled { .. }) => ProviderStatus::Degraded,
                    Err(e) => {
                        tracing::warn!(source = source.name(), error = %e, "Source probe failed");
                        ProviderStatus::Unavailable
                    }
                };
                (source.name().to_string(), status)
            })
            .collect()
    }

    /// Subscribes to every quote a source returns from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Quote> {
        self.quotes.subscribe()
    }

    /// Aggregated price of `amount` `from` in `to`, using a single market
    ///
    /// # Arguments
    /// * `ctx` - Request context; its deadline bounds every source call
    /// * `from` - Symbol being converted
    /// * `to` - Symbol being converted into
    /// * `amount` - Amount of `from`
    pub async fn price(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, PriceError> {
        if from == to {
            return Ok(amount);
        }

        let market = Market::new(from.clone(), to.clone());
        let key = market.key();

        if let Some(unit) = self.cache.get(&key).await {
            tracing::debug!(market = %key, price = unit, "Cache hit");
            return Ok(unit * amount);
        }

        let candidates = self.candidates(&market).await;
        let results = join_all(
            candidates
                .iter()
                .map(|source| self.query(ctx, source.as_ref(), from, to)),
        )
        .await;

        let mut quotes = Vec::new();
        for (source, result) in candidates.iter().zip(results) {
            match result {
                Ok(unit) if unit > 0.0 && unit.is_finite() => {
                    quotes.push((source.name().to_string(), unit));
                }
                Ok(unit) => {
                    tracing::debug!(
                        market = %key,
                        source = source.name(),
                        price = unit,
                        "Ignoring unusable quote"
                    );
                }
                Err(
                    e @ (SourceError::UnknownSymbol { .. } | SourceError::MissingMarket { .. }),
                ) => {
                    tracing::debug!(market = %key, error = %e, "Source doesn't quote market");
                }
                Err(e) => {
                    tracing::warn!(market = %key, error = %e, "Source failed to quote market");
                }
            }
        }

        if quotes.is_empty() {
            if let Some(stale) = self.cache.get_stale(&key).await {
                tracing::warn!(
                    market = %key,
                    price = stale,
                    "No source answered, serving stale price"
                );
                return Ok(stale * amount);
            }
            return Err(PriceError::no_quote(key));
        }

        self.record(&market, &quotes, amount).await;

        let mean = quotes.iter().map(|(_, unit)| unit).sum::<f64>() / quotes.len() as f64;
        self.cache.set(&key, mean, None).await;
        Ok(mean * amount)
    }

    /// Sources worth asking about `market`: those that quoted it before,
    /// or every source if none has yet
    async fn candidates(&self, market: &Market) -> Vec<Arc<dyn PriceSource>> {
        let sources = self.sources().await;
        let known = self.provenance.read().await.get(market).cloned();
        match known {
            Some(names) if !names.is_empty() => {
                let narrowed: Vec<_> = sources
                    .iter()
                    .filter(|s| names.contains(s.name()))
                    .cloned()
                    .collect();
                if narrowed.is_empty() {
                    sources
                } else {
                    narrowed
                }
            }
            _ => sources,
        }
    }

    /// Unit price from one source, bounded by the context deadline
    async fn query(
        &self,
        ctx: &PriceContext<'_>,
        source: &dyn PriceSource,
        from: &Symbol,
        to: &Symbol,
    ) -> Result<f64, SourceError> {
        let started = Instant::now();
        let request = source.price(ctx, from, to, 1.0);
        let result = match ctx.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, request)
                .await
                .unwrap_or_else(|_| {
                    Err(SourceError::unavailable(source.name(), "deadline exceeded"))
                }),
            None => request.await,
        };

        self.collector(source.name())
            .await
            .record(started.elapsed(), &result)
            .await;
        result
    }

    async fn collector(&self, source_name: &str) -> Arc<MetricsCollector> {
        if let Some(collector) = self.metrics.read().await.get(source_name) {
            return collector.clone();
        }
        self.metrics
            .write()
            .await
            .entry(source_name.to_string())
            .or_insert_with(|| Arc::new(MetricsCollector::new(source_name)))
            .clone()
    }

    /// Remembers who quoted `market` and publishes the quotes
    async fn record(&self, market: &Market, quotes: &[(String, f64)], amount: f64) {
        {
            let mut provenance = self.provenance.write().await;
            let names = provenance.entry(market.clone()).or_default();
            names.extend(quotes.iter().map(|(name, _)| name.clone()));
        }

        for (name, unit) in quotes {
            // no subscribers is fine
            let _ = self
                .quotes
                .send(Quote::new(market.clone(), *unit, amount, name.as_str()));
        }
    }
}

/// Merges per-source lists, skipping sources that failed
fn union<T: Ord>(
    lists: Vec<(Arc<dyn PriceSource>, Result<Vec<T>, SourceError>)>,
    what: &str,
) -> Vec<T> {
    let mut merged = BTreeSet::new();
    for (source, result) in lists {
        match result {
            Ok(items) => merged.extend(items),
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "Failed to list {}", what);
            }
        }
    }
    merged.into_iter().collect()
}
