//! Virtual sources: baskets of assets and per-share fund baskets
//!
//! A basket's value is the weighted sum of its components, each priced
//! through the network the basket is registered in. Baskets may contain other
//! baskets, including themselves; a pair already being valued further up the
//! call chain contributes 0.

use crate::{
    config::NetworkConfig,
    error::SourceError,
    source::{check_symbols, PriceContext, PriceSource},
    types::{Market, Symbol},
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A named bag of `{symbol: weight}`
#[derive(Debug, Clone, PartialEq)]
pub struct Basket {
    pub name: Symbol,
    pub weights: BTreeMap<Symbol, f64>,
}

impl Basket {
    pub fn new(name: impl Into<Symbol>, weights: BTreeMap<Symbol, f64>) -> Self {
        Self {
            name: name.into(),
            weights,
        }
    }

    /// Builds the basket backing one share of a fund
    ///
    /// Each weight is `holding / shares_outstanding`. With no shares
    /// outstanding the basket is empty and is worth nothing.
    pub fn fund_shares(
        name: impl Into<Symbol>,
        holdings: &BTreeMap<Symbol, f64>,
        shares_outstanding: f64,
    ) -> Self {
        let weights = if shares_outstanding == 0.0 {
            BTreeMap::new()
        } else {
            holdings
                .iter()
                .map(|(symbol, amount)| (symbol.clone(), amount / shares_outstanding))
                .collect()
        };
        Self::new(name, weights)
    }
}

/// Prices baskets against a fixed set of base symbols
pub struct BasketSource {
    baskets: BTreeMap<Symbol, Basket>,
    /// The first entry is the base every ratio is computed in
    base_symbols: Vec<Symbol>,
}

impl BasketSource {
    pub const NAME: &'static str = "Baskets";

    pub fn new(
        baskets: impl IntoIterator<Item = Basket>,
        base_symbols: Vec<Symbol>,
    ) -> Result<Self, SourceError> {
        if base_symbols.is_empty() {
            return Err(SourceError::unavailable(Self::NAME, "no base symbols configured"));
        }
        Ok(Self {
            baskets: baskets.into_iter().map(|b| (b.name.clone(), b)).collect(),
            base_symbols,
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, SourceError> {
        let baskets = config.baskets.iter().map(|(name, weights)| {
            let weights = weights
                .iter()
                .map(|(symbol, weight)| (Symbol::new(symbol), *weight))
                .collect();
            Basket::new(Symbol::new(name), weights)
        });
        let base_symbols = config
            .basket_base_symbols
            .iter()
            .map(Symbol::new)
            .collect();
        Self::new(baskets, base_symbols)
    }

    fn pricing_base(&self) -> &Symbol {
        &self.base_symbols[0]
    }

    fn known_symbols(&self) -> Vec<Symbol> {
        self.baskets
            .keys()
            .chain(self.base_symbols.iter())
            .cloned()
            .collect()
    }

    /// Net asset value of one unit of `basket`, in `base`
    async fn nav(
        &self,
        ctx: &PriceContext<'_>,
        basket: &Basket,
        base: &Symbol,
    ) -> Result<f64, SourceError> {
        let Some(_guard) = ctx.enter(&basket.name, base) else {
            tracing::debug!(
                basket = %basket.name,
                base = %base,
                "Basket already being valued, contributing 0"
            );
            return Ok(0.0);
        };

        let resolver = ctx.resolver().ok_or_else(|| {
            SourceError::unavailable(Self::NAME, "no resolver to price components")
        })?;

        let mut total = 0.0;
        for (symbol, weight) in &basket.weights {
            if *weight == 0.0 {
                continue;
            }
            // a component valued further up the chain is a cycle
            if ctx.is_visiting(symbol, base) {
                tracing::debug!(
                    basket = %basket.name,
                    component = %symbol,
                    "Component already being valued, contributing 0"
                );
                continue;
            }
            let value = resolver
                .resolve(ctx, symbol, base, *weight)
                .await
                .map_err(|e| {
                    SourceError::unavailable(
                        Self::NAME,
                        format!("can't price {} component {}: {}", basket.name, symbol, e),
                    )
                })?;
            total += value;
        }
        Ok(total)
    }

    /// Value of one unit of `symbol` in `base`
    async fn value(
        &self,
        ctx: &PriceContext<'_>,
        symbol: &Symbol,
        base: &Symbol,
    ) -> Result<f64, SourceError> {
        if let Some(basket) = self.baskets.get(symbol) {
            return self.nav(ctx, basket, base).await;
        }
        if symbol == base {
            return Ok(1.0);
        }
        let resolver = ctx.resolver().ok_or_else(|| {
            SourceError::unavailable(Self::NAME, "no resolver to price components")
        })?;
        resolver
            .resolve(ctx, symbol, base, 1.0)
            .await
            .map_err(|e| SourceError::unavailable(Self::NAME, e.to_string()))
    }
}

#[async_trait]
impl PriceSource for BasketSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.known_symbols())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.base_symbols.clone())
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        Ok(self
            .baskets
            .keys()
            .flat_map(|name| {
                self.base_symbols
                    .iter()
                    .map(move |base| Market::new(name.clone(), base.clone()))
            })
            .collect())
    }

    async fn price(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError> {
        check_symbols(Self::NAME, &self.known_symbols(), &[from, to])?;

        if from == to {
            return Ok(amount);
        }
        if !self.baskets.contains_key(from) && !self.baskets.contains_key(to) {
            return Err(SourceError::missing_market(
                Self::NAME,
                Market::new(from.clone(), to.clone()).key(),
            ));
        }

        let base = self.pricing_base();
        let numerator = self.value(ctx, from, base).await?;
        let denominator = self.value(ctx, to, base).await?;
        if denominator == 0.0 {
            return Ok(0.0);
        }
        Ok(numerator / denominator * amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PriceError;
    use crate::source::PriceResolver;

    /// Resolver backed by a fixed table of unit prices into BTC
    struct TableResolver(BTreeMap<Symbol, f64>);

    #[async_trait]
    impl PriceResolver for TableResolver {
        async fn resolve(
            &self,
            _ctx: &PriceContext<'_>,
            from: &Symbol,
            to: &Symbol,
            amount: f64,
        ) -> Result<f64, PriceError> {
            if from == to {
                return Ok(amount);
            }
            let from_btc = self
                .0
                .get(from)
                .ok_or_else(|| PriceError::UnknownSymbol(from.to_string()))?;
            let to_btc = self
                .0
                .get(to)
                .ok_or_else(|| PriceError::UnknownSymbol(to.to_string()))?;
            Ok(from_btc / to_btc * amount)
        }
    }

    fn resolver() -> TableResolver {
        TableResolver(
            [
                (Symbol::new("BTC"), 1.0),
                (Symbol::new("USD"), 1.0 / 20000.0),
                (Symbol::new("ETH"), 0.05),
            ]
            .into(),
        )
    }

    fn weights(entries: &[(&str, f64)]) -> BTreeMap<Symbol, f64> {
        entries.iter().map(|(s, w)| (Symbol::new(s), *w)).collect()
    }

    fn source(baskets: Vec<Basket>) -> BasketSource {
        BasketSource::new(baskets, vec![Symbol::new("BTC"), Symbol::new("USD")]).unwrap()
    }

    #[tokio::test]
    async fn test_basket_priced_against_each_base() {
        let source = source(vec![Basket::new("IDX", weights(&[("ETH", 10.0), ("BTC", 0.5)]))]);
        let resolver = resolver();
        let ctx = PriceContext::new().with_resolver(&resolver);

        let in_btc = source
            .price(&ctx, &"IDX".into(), &"BTC".into(), 2.0)
            .await
            .unwrap();
        assert!((in_btc - 2.0).abs() < 1e-9);

        let in_usd = source
            .price(&ctx, &"IDX".into(), &"USD".into(), 1.0)
            .await
            .unwrap();
        assert!((in_usd - 20000.0).abs() < 1e-6);

        let inverse = source
            .price(&ctx, &"BTC".into(), &"IDX".into(), 1.0)
            .await
            .unwrap();
        assert!((inverse - 1.0).abs() < 1e-9);
        assert_eq!(ctx.depth(), 0);
    }

    #[tokio::test]
    async fn test_markets_and_symbols() {
        let source = source(vec![Basket::new("IDX", weights(&[("ETH", 1.0)]))]);
        assert_eq!(
            source.markets().await.unwrap(),
            vec![Market::parse("IDX/BTC").unwrap(), Market::parse("IDX/USD").unwrap()]
        );
        assert_eq!(
            source.symbols().await.unwrap(),
            vec![Symbol::new("IDX"), Symbol::new("BTC"), Symbol::new("USD")]
        );

        let ctx = PriceContext::new();
        assert_eq!(
            source.price(&ctx, &"ETH".into(), &"BTC".into(), 1.0).await,
            Err(SourceError::unknown_symbol("Baskets", "ETH"))
        );
        assert_eq!(
            source.price(&ctx, &"USD".into(), &"BTC".into(), 1.0).await,
            Err(SourceError::missing_market("Baskets", "USD/BTC"))
        );
    }

    #[tokio::test]
    async fn test_nested_visit_contributes_zero() {
        let source = source(vec![Basket::new("IDX", weights(&[("ETH", 1.0)]))]);
        let resolver = resolver();
        let ctx = PriceContext::new().with_resolver(&resolver);

        let _outer = ctx.enter(&"IDX".into(), &"BTC".into()).unwrap();
        assert_eq!(
            source.price(&ctx, &"IDX".into(), &"BTC".into(), 1.0).await.unwrap(),
            0.0
        );
    }

    #[tokio::test]
    async fn test_self_component_is_not_resolved() {
        // the table resolver doesn't know SELF, so resolving it would fail
        let source = source(vec![Basket::new(
            "SELF",
            weights(&[("SELF", 3.0), ("ETH", 10.0)]),
        )]);
        let resolver = resolver();
        let ctx = PriceContext::new().with_resolver(&resolver);

        let price = source
            .price(&ctx, &"SELF".into(), &"BTC".into(), 1.0)
            .await
            .unwrap();
        assert!((price - 0.5).abs() < 1e-12);
        assert_eq!(ctx.depth(), 0);
    }

    #[tokio::test]
    async fn test_missing_resolver_is_unavailable() {
        let source = source(vec![Basket::new("IDX", weights(&[("ETH", 1.0)]))]);
        let err = source
            .price(&PriceContext::new(), &"IDX".into(), &"BTC".into(), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_fund_shares() {
        let holdings = weights(&[("BTC", 10.0), ("ETH", 100.0)]);
        let fund = Basket::fund_shares("FUND", &holdings, 1000.0);
        assert_eq!(fund.weights, weights(&[("BTC", 0.01), ("ETH", 0.1)]));

        let empty = Basket::fund_shares("EMPTY", &holdings, 0.0);
        assert!(empty.weights.is_empty());

        let source = source(vec![fund, empty]);
        let resolver = resolver();
        let ctx = PriceContext::new().with_resolver(&resolver);
        let nav = source
            .price(&ctx, &"FUND".into(), &"BTC".into(), 1.0)
            .await
            .unwrap();
        assert!((nav - 0.015).abs() < 1e-12);
        assert_eq!(
            source.price(&ctx, &"EMPTY".into(), &"BTC".into(), 1.0).await.unwrap(),
            0.0
        );
        // zero denominator
        assert_eq!(
            source.price(&ctx, &"FUND".into(), &"EMPTY".into(), 1.0).await.unwrap(),
            0.0
        );
    }

    #[test]
    fn test_requires_a_base_symbol() {
        assert!(BasketSource::new(Vec::new(), Vec::new()).is_err());

        let mut config = NetworkConfig::default();
        config
            .baskets
            .insert("IDX".to_string(), [("ETH".to_string(), 1.0)].into());
        let source = BasketSource::from_config(&config).unwrap();
        assert_eq!(source.pricing_base(), &Symbol::new("BTC"));
    }
}
