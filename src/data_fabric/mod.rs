// =============================================================================
// Market-Data Fabric (§4.2)
// =============================================================================

pub mod cache;
pub mod circuit_breaker;
pub mod provider;
pub mod providers;
pub mod rate_limit;

use anyhow::Result;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::{Event, EventKind, EventSink};

pub use provider::{Bar, DataQuality, ProviderError, Quote, QuoteProvider, Timeframe};

use cache::TieredCache;
use circuit_breaker::CircuitBreaker;
use rate_limit::TokenBucket;

const BROKER_BATCH_SIZE: usize = 50;

struct ProviderEntry {
    provider: Arc<dyn QuoteProvider>,
    breaker: CircuitBreaker,
    bucket: TokenBucket,
}

/// Coordinates a priority-ordered roster of providers behind a single
/// provider-agnostic API, with per-provider circuit breaking, rate
/// limiting, and three tiers of TTL-bounded caches.
pub struct DataFabric {
    providers: Vec<ProviderEntry>,
    quote_cache: TieredCache<String, Quote>,
    bar_cache: TieredCache<(String, Timeframe), Vec<Bar>>,
    events: EventSink,
}

impl DataFabric {
    pub fn new(
        providers_in_priority_order: Vec<Arc<dyn QuoteProvider>>,
        quote_ttl: Duration,
        bar_ttl: Duration,
        events: EventSink,
    ) -> Self {
        let providers = providers_in_priority_order
            .into_iter()
            .map(|provider| {
                let bucket = TokenBucket::new(provider.burst_capacity(), provider.calls_per_minute());
                ProviderEntry {
                    breaker: CircuitBreaker::new(provider.id()),
                    bucket,
                    provider,
                }
            })
            .collect();

        Self {
            providers,
            quote_cache: TieredCache::new(1024, quote_ttl),
            bar_cache: TieredCache::new(1024, bar_ttl),
            events,
        }
    }

    /// `getQuote` (§4.2). Serves from cache if fresh; otherwise walks
    /// the provider roster in priority order, skipping any with an
    /// open circuit or an exhausted bucket whose wait would exceed
    /// `max_wait`.
    pub async fn get_quote(&self, symbol: &str, max_wait_ms: i64) -> Result<Quote, ProviderError> {
        if let Some(quote) = self.quote_cache.get(&symbol.to_string()) {
            return Ok(quote);
        }

        for (idx, entry) in self.providers.iter().enumerate() {
            if !entry.breaker.allow_request() {
                continue;
            }
            if !entry.bucket.try_take() {
                let wait = entry.bucket.wait_time_ms();
                if wait > max_wait_ms {
                    continue;
                }
                tokio::time::sleep(std::time::Duration::from_millis(wait.max(0) as u64)).await;
            }

            match entry.provider.quote(symbol).await {
                Ok(quote) => {
                    entry.breaker.record_success();
                    self.quote_cache.put(symbol.to_string(), quote.clone());
                    return Ok(quote);
                }
                Err(err) => {
                    entry.breaker.record_failure();
                    warn!(provider = entry.provider.id(), symbol, error = %err, "quote fetch failed");
                    if idx + 1 < self.providers.len() {
                        self.events.emit(
                            Event::new(
                                EventKind::ProviderFailover,
                                serde_json::json!({"from": entry.provider.id(), "symbol": symbol}),
                            )
                            .with_symbol(symbol),
                        );
                    }
                }
            }
        }

        Err(ProviderError::Transient(format!("no provider available for {symbol}")))
    }

    /// `batchQuotes` (§4.2). Chunks into `BROKER_BATCH_SIZE`-sized
    /// groups, dispatches chunks concurrently, tolerates partial
    /// per-symbol failures — never returns a quote for an unrelated
    /// symbol (§8.2).
    pub async fn batch_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let mut results = HashMap::new();
        for chunk in symbols.chunks(BROKER_BATCH_SIZE) {
            let futures = chunk.iter().map(|symbol| self.get_quote(symbol, 2000));
            let chunk_results = futures_util::future::join_all(futures).await;
            for (symbol, result) in chunk.iter().zip(chunk_results) {
                match result {
                    Ok(quote) if &quote.symbol == symbol => {
                        results.insert(symbol.clone(), quote);
                    }
                    Ok(_) => {
                        warn!(symbol, "provider returned mismatched symbol, discarding");
                    }
                    Err(err) => {
                        debug!(symbol, error = %err, "batch quote entry failed");
                    }
                }
            }
        }
        results
    }

    /// `getBars` (§4.2). Bars are served from the secondary (bar-
    /// capable) providers; caching is keyed by `(symbol, timeframe)`.
    pub async fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError> {
        let cache_key = (symbol.to_string(), timeframe);
        if let Some(bars) = self.bar_cache.get(&cache_key) {
            if bars.len() >= count {
                return Ok(bars);
            }
        }

        for entry in &self.providers {
            if !entry.breaker.allow_request() || !entry.bucket.try_take() {
                continue;
            }
            match entry.provider.bars(symbol, timeframe, count).await {
                Ok(bars) => {
                    entry.breaker.record_success();
                    self.bar_cache.put(cache_key, bars.clone());
                    return Ok(bars);
                }
                Err(ProviderError::InsufficientHistory { .. }) => continue,
                Err(err) => {
                    entry.breaker.record_failure();
                    warn!(provider = entry.provider.id(), symbol, error = %err, "bars fetch failed");
                }
            }
        }

        Err(ProviderError::InsufficientHistory { have: 0, need: count })
    }

    pub fn data_quality(bar_count: usize) -> DataQuality {
        DataQuality::from_bar_count(bar_count)
    }

    /// Periodic sweep; called from a background ticker in addition to
    /// the lazy reap-on-access done by `TieredCache::get`.
    pub fn reap_expired_caches(&self) {
        self.quote_cache.reap_expired();
        self.bar_cache.reap_expired();
    }

    pub fn provider_status(&self) -> Vec<(&'static str, circuit_breaker::BreakerState)> {
        self.providers
            .iter()
            .map(|e| (e.provider.id(), e.breaker.state()))
            .collect()
    }
}
