//! Undirected graph of symbols (nodes) and markets (edges)

use crate::types::{Market, Symbol};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Symbol graph used for routing conversions
///
/// Neighbours are kept sorted, so [`shortest_path`](Self::shortest_path)
/// returns the same path for the same graph every time.
#[derive(Debug, Clone, Default)]
pub struct PriceGraph {
    adjacency: BTreeMap<Symbol, BTreeSet<Symbol>>,
}

impl PriceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a node list and an edge list. Edge endpoints
    /// that aren't listed as nodes are added.
    pub fn build(
        symbols: impl IntoIterator<Item = Symbol>,
        markets: impl IntoIterator<Item = Market>,
    ) -> Self {
        let mut graph = Self::new();
        for symbol in symbols {
            graph.add_node(symbol);
        }
        for market in markets {
            graph.add_edge(&market);
        }
        graph
    }

    pub fn add_node(&mut self, symbol: Symbol) {
        self.adjacency.entry(symbol).or_default();
    }

    /// Connects both symbols of `market` in both directions
    pub fn add_edge(&mut self, market: &Market) {
        if market.base == market.quote {
            self.add_node(market.base.clone());
            return;
        }
        self.adjacency
            .entry(market.base.clone())
            .or_default()
            .insert(market.quote.clone());
        self.adjacency
            .entry(market.quote.clone())
            .or_default()
            .insert(market.base.clone());
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.adjacency.contains_key(symbol)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn neighbours(&self, symbol: &Symbol) -> impl Iterator<Item = &Symbol> {
        self.adjacency.get(symbol).into_iter().flatten()
    }

    /// Fewest-hops path from `from` to `to`, both ends included
    ///
    /// Returns `None` if either symbol is missing or they aren't connected.
    pub fn shortest_path(&self, from: &Symbol, to: &Symbol) -> Option<Vec<Symbol>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.clone()]);
        }

        let mut previous: HashMap<&Symbol, &Symbol> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        previous.insert(from, from);

        while let Some(current) = queue.pop_front() {
            for next in self.neighbours(current) {
                if previous.contains_key(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == to {
                    return Some(Self::unwind(&previous, from, to));
                }
                queue.push_back(next);
            }
        }
        None
    }

    fn unwind<'a>(
        previous: &HashMap<&'a Symbol, &'a Symbol>,
        from: &Symbol,
        to: &'a Symbol,
    ) -> Vec<Symbol> {
        let mut path = vec![to.clone()];
        let mut current = to;
        while current != from {
            match previous.get(current) {
                Some(prev) => {
                    current = *prev;
                    path.push(current.clone());
                }
                None => break,
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(pair: &str) -> Market {
        Market::parse(pair).unwrap()
    }

    fn path(symbols: &[&str]) -> Vec<Symbol> {
        symbols.iter().map(|s| Symbol::new(s)).collect()
    }

    #[test]
    fn test_build_counts() {
        let graph = PriceGraph::build(
            [Symbol::new("DOGE")],
            [market("XBT/BTC"), market("BTC/USD"), market("USD/BTC")],
        );
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.contains(&"DOGE".into()));
    }

    #[test]
    fn test_shortest_path_multi_hop() {
        let graph = PriceGraph::build(
            Vec::new(),
            [
                market("XBT/BTC"),
                market("BTC/USD"),
                market("ETH/BTC"),
                market("ETH/USD"),
                market("LTC/ETH"),
            ],
        );
        assert_eq!(
            graph.shortest_path(&"XBT".into(), &"USD".into()),
            Some(path(&["XBT", "BTC", "USD"]))
        );
        assert_eq!(
            graph.shortest_path(&"LTC".into(), &"XBT".into()),
            Some(path(&["LTC", "ETH", "BTC", "XBT"]))
        );
        assert_eq!(
            graph.shortest_path(&"BTC".into(), &"BTC".into()),
            Some(path(&["BTC"]))
        );
    }

    #[test]
    fn test_shortest_path_is_deterministic() {
        // two equally short routes; the alphabetically first neighbour wins
        let graph = PriceGraph::build(
            Vec::new(),
            [
                market("A/Z"),
                market("A/M"),
                market("M/B"),
                market("Z/B"),
            ],
        );
        for _ in 0..5 {
            assert_eq!(
                graph.shortest_path(&"A".into(), &"B".into()),
                Some(path(&["A", "M", "B"]))
            );
        }
    }

    #[test]
    fn test_disconnected_and_missing() {
        let graph = PriceGraph::build([Symbol::new("ISLAND")], [market("BTC/USD")]);
        assert_eq!(graph.shortest_path(&"ISLAND".into(), &"USD".into()), None);
        assert_eq!(graph.shortest_path(&"NOPE".into(), &"USD".into()), None);
    }
}
