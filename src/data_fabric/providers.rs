// =============================================================================
// Concrete provider implementations (§4.2 roster)
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::broker::BrokerClient;
use crate::price::Price;

use super::provider::{Bar, ProviderError, Quote, QuoteProvider, Timeframe};

/// Wraps the authenticated broker client as the primary, realtime
/// provider (10k/day free quota per §4.2's roster note).
pub struct BrokerProvider {
    client: Arc<BrokerClient>,
}

impl BrokerProvider {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuoteProvider for BrokerProvider {
    fn id(&self) -> &'static str {
        "broker"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let quotes = self
            .batch_quote(std::slice::from_ref(&symbol.to_string()))
            .await?;
        quotes
            .into_iter()
            .find(|q| q.symbol == symbol)
            .ok_or_else(|| ProviderError::Transient(format!("no quote for {symbol}")))
    }

    async fn batch_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
        let broker_quotes = self
            .client
            .batch_quote(symbols)
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        Ok(broker_quotes
            .into_iter()
            .map(|q| Quote {
                symbol: q.symbol,
                last_price: q.last_price,
                bid: q.bid,
                ask: q.ask,
                open: q.open,
                high: q.high,
                low: q.low,
                volume: q.volume,
                timestamp: q.timestamp,
            })
            .collect())
    }

    async fn bars(&self, _symbol: &str, _timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError> {
        // The broker's historical-bar endpoint is not part of the
        // semantic endpoint list in §6.1; bars come from the
        // secondary providers. Surface as insufficient history so the
        // fabric fails over immediately rather than stalling on a
        // call this provider cannot answer.
        Err(ProviderError::InsufficientHistory { have: 0, need: count })
    }

    fn calls_per_minute(&self) -> u32 {
        120
    }

    fn burst_capacity(&self) -> u32 {
        50
    }
}

/// Shared HTTP-polling shape for the three bar-history fallback
/// providers; each differs only in base URL, auth header, and response
/// schema, so the common request plumbing lives once here.
struct HttpBarsProvider {
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    calls_per_minute: u32,
    burst_capacity: u32,
}

impl HttpBarsProvider {
    fn new(
        name: &'static str,
        base_url: impl Into<String>,
        api_key: Option<String>,
        calls_per_minute: u32,
        burst_capacity: u32,
    ) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
            calls_per_minute,
            burst_capacity,
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let mut url = format!("{}/quote/{}", self.base_url, symbol);
        if let Some(key) = &self.api_key {
            url.push_str(&format!("?apikey={key}"));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(format!("{} rate limited", self.name)));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        debug!(provider = self.name, symbol, "quote fetched");
        Ok(Quote {
            symbol: symbol.to_string(),
            last_price: Price::from_f64(body["last"].as_f64().unwrap_or(0.0)),
            bid: Price::from_f64(body["bid"].as_f64().unwrap_or(0.0)),
            ask: Price::from_f64(body["ask"].as_f64().unwrap_or(0.0)),
            open: Price::from_f64(body["open"].as_f64().unwrap_or(0.0)),
            high: Price::from_f64(body["high"].as_f64().unwrap_or(0.0)),
            low: Price::from_f64(body["low"].as_f64().unwrap_or(0.0)),
            volume: body["volume"].as_f64().unwrap_or(0.0),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError> {
        let mut url = format!(
            "{}/bars/{}?timeframe={:?}&count={}",
            self.base_url, symbol, timeframe, count
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={key}"));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(format!("{} rate limited", self.name)));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        let entries = body["bars"].as_array().cloned().unwrap_or_default();
        if entries.len() < count.min(20) {
            return Err(ProviderError::InsufficientHistory { have: entries.len(), need: count });
        }
        let bars = entries
            .into_iter()
            .map(|b| Bar {
                timestamp: Utc::now(),
                open: Price::from_f64(b["open"].as_f64().unwrap_or(0.0)),
                high: Price::from_f64(b["high"].as_f64().unwrap_or(0.0)),
                low: Price::from_f64(b["low"].as_f64().unwrap_or(0.0)),
                close: Price::from_f64(b["close"].as_f64().unwrap_or(0.0)),
                volume: b["volume"].as_f64().unwrap_or(0.0),
            })
            .collect();
        Ok(bars)
    }
}

macro_rules! http_provider {
    ($name:ident, $id:literal, $cpm:expr, $burst:expr) => {
        pub struct $name {
            inner: HttpBarsProvider,
        }

        impl $name {
            pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
                Self {
                    inner: HttpBarsProvider::new($id, base_url, api_key, $cpm, $burst),
                }
            }
        }

        #[async_trait]
        impl QuoteProvider for $name {
            fn id(&self) -> &'static str {
                $id
            }

            async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
                self.inner.fetch_quote(symbol).await
            }

            async fn batch_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
                let mut out = Vec::with_capacity(symbols.len());
                for symbol in symbols {
                    out.push(self.inner.fetch_quote(symbol).await?);
                }
                Ok(out)
            }

            async fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError> {
                self.inner.fetch_bars(symbol, timeframe, count).await
            }

            fn calls_per_minute(&self) -> u32 {
                $cpm
            }

            fn burst_capacity(&self) -> u32 {
                $burst
            }
        }
    };
}

http_provider!(PolygonProvider, "polygon", 100, 20);
http_provider!(AlphaVantageProvider, "alphavantage", 5, 5);
http_provider!(YahooProvider, "yahoo", 60, 10);
