//! Source abstraction for fetching pair prices from exchanges, scrapers and
//! static tables

use crate::{
    error::{PriceError, SourceError},
    types::{Market, Symbol},
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Trait for price sources
///
/// Implementations can quote pairs from exchanges (Bitfinex, Bittrex, Poloniex),
/// scraped listing pages, static conversion tables or synthetic baskets.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Returns the name of this source
    fn name(&self) -> &str;

    /// Returns true if this source only works with API credentials
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Every symbol this source can price, normalized to its own convention
    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError>;

    /// The symbols this source uses as quote currencies
    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError>;

    /// Every market this source currently quotes
    async fn markets(&self) -> Result<Vec<Market>, SourceError>;

    /// Returns how much of `to` one would get for `amount` of `from`
    ///
    /// # Arguments
    /// * `ctx` - Call-chain context (deadline, recursion guard, resolver)
    /// * `from` - Symbol being converted
    /// * `to` - Symbol being converted into
    /// * `amount` - Amount of `from`
    async fn price(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError>;
}

/// Something that can price any pair by routing through the network
///
/// Virtual sources use this to price their components recursively.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    async fn resolve(
        &self,
        ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, PriceError>;
}

/// State carried through one price request, including every nested
/// request a basket makes while valuing itself
pub struct PriceContext<'a> {
    resolver: Option<&'a dyn PriceResolver>,
    deadline: Option<Instant>,
    visited: Mutex<HashSet<(Symbol, Symbol)>>,
    depth: AtomicUsize,
}

impl Default for PriceContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PriceContext<'a> {
    pub fn new() -> Self {
        Self {
            resolver: None,
            deadline: None,
            visited: Mutex::new(HashSet::new()),
            depth: AtomicUsize::new(0),
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn PriceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Bounds every source call made under this context
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn resolver(&self) -> Option<&'a dyn PriceResolver> {
        self.resolver
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Marks `(from, to)` as being evaluated in this call chain
    ///
    /// Returns `None` if the pair is already being evaluated further up the
    /// chain. The visited set is cleared once the outermost guard drops.
    pub fn enter(&self, from: &Symbol, to: &Symbol) -> Option<VisitGuard<'_, 'a>> {
        let mut visited = self.visited.lock().unwrap_or_else(PoisonError::into_inner);
        if !visited.insert((from.clone(), to.clone())) {
            return None;
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        Some(VisitGuard { ctx: self })
    }

    /// Whether `(from, to)` is being evaluated further up this call chain
    pub fn is_visiting(&self, from: &Symbol, to: &Symbol) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(from.clone(), to.clone()))
    }

    /// Current recursion depth
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    fn leave(&self) {
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.visited
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }
}

/// Releases a [`PriceContext::enter`] mark
pub struct VisitGuard<'c, 'a> {
    ctx: &'c PriceContext<'a>,
}

impl Drop for VisitGuard<'_, '_> {
    fn drop(&mut self) {
        self.ctx.leave();
    }
}

/// Which way a rate was found relative to the requested pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Direct,
    Inverse,
}

impl Direction {
    /// Orients a rate read off a market. A zero inverse rate is left as is;
    /// callers treat it as unusable.
    pub fn apply(self, rate: f64) -> f64 {
        match self {
            Direction::Direct => rate,
            Direction::Inverse if rate == 0.0 => rate,
            Direction::Inverse => 1.0 / rate,
        }
    }
}

/// Fails with `UnknownSymbol` for the first symbol the source doesn't know
pub fn check_symbols(
    source_name: &str,
    known: &[Symbol],
    symbols: &[&Symbol],
) -> Result<(), SourceError> {
    for symbol in symbols {
        if !known.contains(symbol) {
            return Err(SourceError::unknown_symbol(source_name, symbol.as_str()));
        }
    }
    Ok(())
}

/// Finds the market quoting `from/to`, trying the direct pair first and the
/// inverse second
pub fn locate_market<F>(
    source_name: &str,
    from: &Symbol,
    to: &Symbol,
    has_market: F,
) -> Result<(Market, Direction), SourceError>
where
    F: Fn(&Market) -> bool,
{
    let direct = Market::new(from.clone(), to.clone());
    if has_market(&direct) {
        return Ok((direct, Direction::Direct));
    }
    let inverse = direct.inverse();
    if has_market(&inverse) {
        return Ok((inverse, Direction::Inverse));
    }
    Err(SourceError::missing_market(source_name, direct.key()))
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mock source for testing
    pub struct MockSource {
        name: String,
        responses: Arc<Mutex<HashMap<Market, Result<f64, SourceError>>>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockSource {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                responses: Arc::new(Mutex::new(HashMap::new())),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        /// Builder variant of [`MockSource::set_price`]
        pub fn with_price(self, base: &str, quote: &str, price: f64) -> Self {
            self.set_price(base, quote, price);
            self
        }

        pub fn set_price(&self, base: &str, quote: &str, price: f64) {
            let market = Market::new(Symbol::new(base), Symbol::new(quote));
            self.responses.lock().unwrap().insert(market, Ok(price));
        }

        pub fn set_error(&self, base: &str, quote: &str, error: SourceError) {
            let market = Market::new(Symbol::new(base), Symbol::new(quote));
            self.responses.lock().unwrap().insert(market, Err(error));
        }

        /// Number of `price` calls received
        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl PriceSource for MockSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
            let mut symbols: Vec<Symbol> = self
                .responses
                .lock()
                .unwrap()
                .keys()
                .flat_map(|m| [m.base.clone(), m.quote.clone()])
                .collect();
            symbols.sort();
            symbols.dedup();
            Ok(symbols)
        }

        async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
            let mut symbols: Vec<Symbol> = self
                .responses
                .lock()
                .unwrap()
                .keys()
                .map(|m| m.quote.clone())
                .collect();
            symbols.sort();
            symbols.dedup();
            Ok(symbols)
        }

        async fn markets(&self) -> Result<Vec<Market>, SourceError> {
            Ok(self.responses.lock().unwrap().keys().cloned().collect())
        }

        async fn price(
            &self,
            _ctx: &PriceContext<'_>,
            from: &Symbol,
            to: &Symbol,
            amount: f64,
        ) -> Result<f64, SourceError> {
            *self.call_count.lock().unwrap() += 1;
            let symbols = self.symbols().await?;
            check_symbols(&self.name, &symbols, &[from, to])?;
            if from == to {
                return Ok(amount);
            }

            let responses = self.responses.lock().unwrap();
            let (market, direction) =
                locate_market(&self.name, from, to, |m| responses.contains_key(m))?;
            match &responses[&market] {
                Ok(rate) => Ok(direction.apply(*rate) * amount),
                Err(err) => Err(err.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSource;
    use super::*;

    #[test]
    fn test_direction_apply_skips_zero_inversion() {
        assert_eq!(Direction::Direct.apply(4.0), 4.0);
        assert_eq!(Direction::Inverse.apply(4.0), 0.25);
        assert_eq!(Direction::Inverse.apply(0.0), 0.0);
    }

    #[test]
    fn test_locate_market_prefers_direct() {
        let markets = [
            Market::new("BTC".into(), "USD".into()),
            Market::new("USD".into(), "BTC".into()),
        ];
        let (market, direction) =
            locate_market("test", &"BTC".into(), &"USD".into(), |m| markets.contains(m)).unwrap();
        assert_eq!(market, markets[0]);
        assert_eq!(direction, Direction::Direct);

        let err = locate_market("test", &"BTC".into(), &"EUR".into(), |m| markets.contains(m))
            .unwrap_err();
        assert_eq!(err, SourceError::missing_market("test", "BTC/EUR"));
    }

    #[test]
    fn test_visit_guard_clears_when_outermost_drops() {
        let ctx = PriceContext::new();
        let (a, b) = (Symbol::new("A"), Symbol::new("B"));

        let outer = ctx.enter(&a, &b).expect("first visit");
        assert!(ctx.is_visiting(&a, &b));
        assert!(!ctx.is_visiting(&b, &a));
        assert!(ctx.enter(&a, &b).is_none());
        {
            let _inner = ctx.enter(&b, &a).expect("different pair");
            assert_eq!(ctx.depth(), 2);
        }
        // still marked while the outer guard lives
        assert!(ctx.enter(&b, &a).is_none());
        drop(outer);

        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.is_visiting(&a, &b));
        assert!(ctx.enter(&a, &b).is_some());
    }

    #[tokio::test]
    async fn test_mock_inverse_consistency() {
        let source = MockSource::new("mock").with_price("BTC", "USD", 20000.0);
        let ctx = PriceContext::new();
        let inverse = source
            .price(&ctx, &"USD".into(), &"BTC".into(), 1.0)
            .await
            .unwrap();
        assert!((inverse - 1.0 / 20000.0).abs() <= 1e-9 * inverse);
        assert_eq!(source.call_count(), 1);
    }
}
