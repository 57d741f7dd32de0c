//! Static conversion table (XBT <-> BTC, mNXT <-> NXT, sat <-> BTC, ...)

use crate::{
    error::SourceError,
    source::{check_symbols, locate_market, PriceContext, PriceSource},
    types::{Market, Symbol},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// A conversion rate slot
#[derive(Clone)]
pub enum RateSpec {
    /// Constant rate
    Fixed(f64),
    /// Rate computed at query time
    Computed(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl RateSpec {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Current value of the rate
    pub fn evaluate(&self) -> f64 {
        match self {
            RateSpec::Fixed(rate) => *rate,
            RateSpec::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateSpec::Fixed(rate) => f.debug_tuple("Fixed").field(rate).finish(),
            RateSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<f64> for RateSpec {
    fn from(rate: f64) -> Self {
        RateSpec::Fixed(rate)
    }
}

/// Conversions between symbols that name the same thing or a fixed multiple
/// of it, exposed as if they were markets
///
/// A `BASE/QUOTE` entry with rate `r` means one `BASE` is worth `r` `QUOTE`.
/// Symbols keep their configured case (`mNXT`, `sat`).
pub struct ConversionsSource {
    mapping: RwLock<BTreeMap<Market, RateSpec>>,
}

impl ConversionsSource {
    pub const NAME: &'static str = "Conversions";

    /// Creates a source holding the default conversion table
    pub fn new() -> Self {
        let source = Self::empty();
        for (base, quote, rate) in Self::default_rates() {
            source.insert(Symbol::new(base), Symbol::new(quote), RateSpec::Fixed(*rate));
        }
        source
    }

    /// Creates a source with no conversions
    pub fn empty() -> Self {
        Self {
            mapping: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a source holding the defaults plus `BASE/QUOTE -> rate`
    /// entries, which override defaults for the same pair
    pub fn with_overrides(overrides: &BTreeMap<String, f64>) -> Result<Self, SourceError> {
        let source = Self::new();
        for (pair, rate) in overrides {
            let market = Market::parse(pair)
                .map_err(|e| SourceError::unavailable(Self::NAME, e.to_string()))?;
            source.insert(market.base, market.quote, RateSpec::Fixed(*rate));
        }
        Ok(source)
    }

    fn default_rates() -> &'static [(&'static str, &'static str, f64)] {
        &[
            ("XBT", "BTC", 1.0),
            ("XDG", "DOGE", 1.0),
            ("mNHZ", "NHZ", 0.001),
            ("mNXT", "NXT", 0.001),
            ("sat", "BTC", 0.000_000_01),
            ("_Coinomat1", "Coinomat1", 1.0),
            ("_MMNXT", "MMNXT", 1.0),
            ("_CoinoUSD", "CoinoUSD", 1.0),
        ]
    }

    /// Adds or replaces a conversion
    pub fn insert(&self, base: Symbol, quote: Symbol, rate: RateSpec) {
        self.mapping
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(Market::new(base, quote), rate);
    }

    fn snapshot(&self) -> BTreeMap<Market, RateSpec> {
        self.mapping
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Default for ConversionsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for ConversionsSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        let symbols: BTreeSet<Symbol> = self
            .snapshot()
            .into_keys()
            .flat_map(|m| [m.base, m.quote])
            .collect();
        Ok(symbols.into_iter().collect())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        let symbols: BTreeSet<Symbol> = self.snapshot().into_keys().map(|m| m.quote).collect();
        Ok(symbols.into_iter().collect())
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        Ok(self.snapshot().into_keys().collect())
    }

    async fn price(
        &self,
        _ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError> {
        let mapping = self.snapshot();
        let known: Vec<Symbol> = mapping
            .keys()
            .flat_map(|m| [m.base.clone(), m.quote.clone()])
            .collect();
        check_symbols(Self::NAME, &known, &[from, to])?;

        // nothing to do here
        if from == to {
            return Ok(amount);
        }

        let (market, direction) = locate_market(Self::NAME, from, to, |m| mapping.contains_key(m))?;
        let rate = mapping[&market].evaluate();
        Ok(direction.apply(rate) * amount)
    }
}
