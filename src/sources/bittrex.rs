//! Bittrex price source implementation

use crate::{
    config::{Credentials, NetworkConfig},
    constants::BITTREX_API_URL,
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
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Envelope every Bittrex v1.1 response comes in
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MarketSummary {
    #[serde(rename = "MarketName")]
    market_name: String,
    #[serde(rename = "Last")]
    last: Option<f64>,
}

/// Last prices keyed by market
///
/// Bittrex names markets `BASE-CURRENCY` (`BTC-LTC` is LTC priced in BTC).
#[derive(Debug, Default)]
struct Summaries {
    last: BTreeMap<Market, f64>,
    base_symbols: BTreeSet<Symbol>,
}

impl Summaries {
    fn parse(raw: Vec<MarketSummary>) -> Self {
        let mut summaries = Summaries::default();
        for summary in raw {
            let Some((quote, base)) = summary.market_name.split_once('-') else {
                continue;
            };
            let Some(last) = summary.last else {
                tracing::debug!(market = %summary.market_name, "Bittrex market has no last trade");
                continue;
            };
            let (base, quote) = (Symbol::ticker(base), Symbol::ticker(quote));
            summaries.base_symbols.insert(quote.clone());
            summaries.last.insert(Market::new(base, quote), last);
        }
        summaries
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

/// Bittrex price source
///
/// Reads every market summary in one request and keeps it for the update
/// interval.
pub struct BittrexSource {
    client: Client,
    base_url: String,
    credentials: Credentials,
    summaries: Snapshot<Summaries>,
}

impl BittrexSource {
    pub const NAME: &'static str = "Bittrex";

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
            summaries: Snapshot::new(update_interval),
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, SourceError> {
        let credentials = config
            .credentials_for(Self::NAME)
            .cloned()
            .ok_or_else(|| SourceError::unavailable(Self::NAME, "missing API credentials"))?;
        Self::new(
            config.endpoint_or(Self::NAME, BITTREX_API_URL),
            credentials,
            config.request_timeout(),
            config.update_interval(),
        )
    }

    async fn summaries(&self) -> Result<Arc<Summaries>, SourceError> {
        self.summaries
            .get_or_refresh(|| async {
                let url = format!("{}/api/v1.1/public/getmarketsummaries", self.base_url);
                tracing::debug!(url = %url, "Fetching Bittrex market summaries");
                let request = self
                    .client
                    .get(&url)
                    .query(&[("apikey", self.credentials.api_key.as_str())]);
                let envelope: Envelope<Vec<MarketSummary>> =
                    fetch_json(Self::NAME, request).await?;
                match envelope {
                    Envelope {
                        success: true,
                        result: Some(result),
                        ..
                    } => Ok(Summaries::parse(result)),
                    Envelope { message, .. } => Err(SourceError::unavailable(
                        Self::NAME,
                        format!("market summaries rejected: {}", message),
                    )),
                }
            })
            .await
    }
}

#[async_trait]
impl PriceSource for BittrexSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.summaries().await?.symbols())
    }

    async fn base_symbols(&self) -> Result<Vec<Symbol>, SourceError> {
        Ok(self.summaries().await?.base_symbols.iter().cloned().collect())
    }

    async fn markets(&self) -> Result<Vec<Market>, SourceError> {
        Ok(self.summaries().await?.last.keys().cloned().collect())
    }

    async fn price(
        &self,
        _ctx: &PriceContext<'_>,
        from: &Symbol,
        to: &Symbol,
        amount: f64,
    ) -> Result<f64, SourceError> {
        let (from, to) = (Symbol::ticker(from), Symbol::ticker(to));
        let summaries = self.summaries().await?;
        check_symbols(Self::NAME, &summaries.symbols(), &[&from, &to])?;

        if from == to {
            return Ok(amount);
        }

        let (market, direction) =
            locate_market(Self::NAME, &from, &to, |m| summaries.last.contains_key(m))?;
        Ok(direction.apply(summaries.last[&market]) * amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUMMARIES_PATH: &str = "/api/v1.1/public/getmarketsummaries";

    fn source_for(server: &MockServer) -> BittrexSource {
        BittrexSource::new(
            server.uri(),
            Credentials::new("key", "secret"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_summaries_parsed_and_memoized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUMMARIES_PATH))
            .and(query_param("apikey", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "",
                "result": [
                    {"MarketName": "USDT-BTC", "Last": 20000.0},
                    {"MarketName": "BTC-LTC", "Last": 0.004},
                    {"MarketName": "BTC-NEW", "Last": null}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server);
        let ctx = PriceContext::new();

        assert_eq!(
            source.markets().await.unwrap(),
            vec![Market::parse("BTC/USDT").unwrap(), Market::parse("LTC/BTC").unwrap()]
        );
        assert_eq!(
            source.base_symbols().await.unwrap(),
            vec![Symbol::new("BTC"), Symbol::new("USDT")]
        );
        let ltc = source
            .price(&ctx, &"ltc".into(), &"btc".into(), 10.0)
            .await
            .unwrap();
        assert!((ltc - 0.04).abs() < 1e-12);
        let inverse = source
            .price(&ctx, &"USDT".into(), &"BTC".into(), 40000.0)
            .await
            .unwrap();
        assert!((inverse - 2.0).abs() < 1e-12);
        assert_eq!(
            source.price(&ctx, &"NEW".into(), &"BTC".into(), 1.0).await,
            Err(SourceError::unknown_symbol("Bittrex", "NEW"))
        );
    }

    #[tokio::test]
    async fn test_rejected_request_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUMMARIES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "APIKEY_INVALID",
                "result": null
            })))
            .mount(&server)
            .await;

        let err = source_for(&server).symbols().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Unavailable { ref reason, .. } if reason.contains("APIKEY_INVALID")
        ));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let mut config = NetworkConfig::default();
        assert!(BittrexSource::from_config(&config).is_err());

        config
            .credentials
            .insert("Bittrex".to_string(), Credentials::new("k", "s"));
        assert!(BittrexSource::from_config(&config).unwrap().requires_credentials());
    }
}
