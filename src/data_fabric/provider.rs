// =============================================================================
// Provider-agnostic quote/bar interface (§4.2)
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::price::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3600,
            Timeframe::D1 => 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: Price,
    pub bid: Price,
    pub ask: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

/// Data-quality tag per §4.2: consumers MAY refuse `Minimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    Excellent,
    Good,
    Limited,
    Minimal,
}

impl DataQuality {
    pub fn from_bar_count(count: usize) -> Self {
        if count >= 200 {
            DataQuality::Excellent
        } else if count >= 50 {
            DataQuality::Good
        } else if count >= 20 {
            DataQuality::Limited
        } else {
            DataQuality::Minimal
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("insufficient history: have {have}, need {need}")]
    InsufficientHistory { have: usize, need: usize },
}

/// One upstream market-data provider. Each concrete provider (Broker,
/// Polygon, AlphaVantage, Yahoo) implements this uniformly so the
/// fabric can iterate the priority-ordered roster without caring which
/// one actually answers.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn id(&self) -> &'static str;

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError>;

    /// `symbols` is pre-chunked by the caller to ≤ the provider's batch
    /// size; partial results are tolerated (§4.2).
    async fn batch_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError>;

    async fn bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError>;

    /// Rolling window in calls/minute this provider advertises, used
    /// to size its token bucket.
    fn calls_per_minute(&self) -> u32;

    fn burst_capacity(&self) -> u32;
}
