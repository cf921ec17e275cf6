// =============================================================================
// Bull/Bear-Aware Sentiment Filter (§4.5)
// =============================================================================
//
// Converts an operator-curated per-underlying sentiment snapshot into a
// direction-aware pass/block/boost decision for a given symbol. Raw news
// aggregation and lexicon scoring are out of process for this engine —
// `universe::SentimentEntry` is the already-scored input (§6.7) — this
// module owns only the polarity-flip and threshold logic of §4.5 steps
// 4-5, plus the per-underlying TTL cache.
// =============================================================================

use std::sync::Arc;
use tracing::warn;

use crate::data_fabric::cache::TieredCache;
use crate::types::{Direction, SentimentDecision};
use crate::universe::SentimentEntry;

const BLOCK_THRESHOLD: f64 = 0.3;
const BOOST_THRESHOLD: f64 = 0.3;
const BOOST_MIN_CONFIDENCE: f64 = 0.6;
const BOOST_BONUS: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct SentimentVerdict {
    pub decision: SentimentDecision,
    pub score: f64,
    pub confidence: f64,
}

impl SentimentVerdict {
    /// Additive confidence bonus to fold into the composite score (§4.5
    /// step 5), already capped to the `Boost` case.
    pub fn confidence_bonus(&self) -> f64 {
        match self.decision {
            SentimentDecision::Boost => BOOST_BONUS,
            _ => 0.0,
        }
    }

    fn neutral() -> Self {
        Self { decision: SentimentDecision::Neutral, score: 0.0, confidence: 0.0 }
    }
}

/// Source of per-underlying sentiment entries. A trait rather than a
/// concrete file reader so a live news feed can replace the curated-file
/// source without touching the filter logic.
pub trait SentimentSource: Send + Sync {
    fn get(&self, underlying_id: &str) -> Option<SentimentEntry>;
}

pub struct SentimentFilter<S: SentimentSource> {
    source: Arc<S>,
    cache: TieredCache<String, SentimentEntry>,
}

impl<S: SentimentSource> SentimentFilter<S> {
    pub fn new(source: Arc<S>, ttl: chrono::Duration) -> Self {
        Self { source, cache: TieredCache::new(256, ttl) }
    }

    /// Evaluate the filter for a symbol with the given underlying and
    /// direction polarity (§4.5 steps 4-5). Source errors / missing
    /// entries degrade to `Neutral`, never `Block`.
    pub fn evaluate(&self, underlying_id: &str, direction: Direction) -> SentimentVerdict {
        let entry = match self.cache.get(&underlying_id.to_string()) {
            Some(e) => e,
            None => match self.source.get(underlying_id) {
                Some(e) => {
                    self.cache.put(underlying_id.to_string(), e.clone());
                    e
                }
                None => {
                    warn!(underlying_id, "no sentiment entry, degrading to Neutral");
                    return SentimentVerdict::neutral();
                }
            },
        };

        let aligned = match direction {
            Direction::Bull => entry.score > 0.0,
            Direction::Bear => entry.score < 0.0,
            Direction::Neutral => true,
        };

        let magnitude = entry.score.abs();
        let decision = if magnitude >= BLOCK_THRESHOLD && !aligned {
            SentimentDecision::Block
        } else if aligned && magnitude >= BOOST_THRESHOLD && entry.confidence >= BOOST_MIN_CONFIDENCE {
            SentimentDecision::Boost
        } else {
            SentimentDecision::Neutral
        };

        SentimentVerdict { decision, score: entry.score, confidence: entry.confidence }
    }
}

/// Reads the operator-curated sentiment file once at startup/refresh
/// (PREP phase per §4.1) and serves from an in-memory map.
pub struct FileSentimentSource {
    entries: std::collections::HashMap<String, SentimentEntry>,
}

impl FileSentimentSource {
    pub fn new(entries: std::collections::HashMap<String, SentimentEntry>) -> Self {
        Self { entries }
    }
}

impl SentimentSource for FileSentimentSource {
    fn get(&self, underlying_id: &str) -> Option<SentimentEntry> {
        self.entries.get(underlying_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn entry(score: f64, confidence: f64) -> SentimentEntry {
        SentimentEntry {
            underlying_id: "QQQ".to_string(),
            score,
            confidence,
            news_count: 5,
            as_of: Utc::now(),
        }
    }

    fn filter_with(score: f64, confidence: f64) -> SentimentFilter<FileSentimentSource> {
        let mut map = HashMap::new();
        map.insert("QQQ".to_string(), entry(score, confidence));
        SentimentFilter::new(Arc::new(FileSentimentSource::new(map)), chrono::Duration::seconds(900))
    }

    #[test]
    fn bull_blocked_on_strong_negative_sentiment() {
        let filter = filter_with(-0.5, 0.8);
        let verdict = filter.evaluate("QQQ", Direction::Bull);
        assert_eq!(verdict.decision, SentimentDecision::Block);
    }

    #[test]
    fn bear_boosted_on_strong_negative_sentiment_with_confidence() {
        let filter = filter_with(-0.5, 0.8);
        let verdict = filter.evaluate("QQQ", Direction::Bear);
        assert_eq!(verdict.decision, SentimentDecision::Boost);
        assert!((verdict.confidence_bonus() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn weak_sentiment_is_neutral() {
        let filter = filter_with(0.1, 0.9);
        let verdict = filter.evaluate("QQQ", Direction::Bull);
        assert_eq!(verdict.decision, SentimentDecision::Neutral);
    }

    #[test]
    fn low_confidence_boost_degrades_to_neutral() {
        let filter = filter_with(0.5, 0.3);
        let verdict = filter.evaluate("QQQ", Direction::Bull);
        assert_eq!(verdict.decision, SentimentDecision::Neutral);
    }

    #[test]
    fn missing_entry_degrades_to_neutral_never_block() {
        let map = HashMap::new();
        let filter = SentimentFilter::new(Arc::new(FileSentimentSource::new(map)), chrono::Duration::seconds(900));
        let verdict = filter.evaluate("MISSING", Direction::Bull);
        assert_eq!(verdict.decision, SentimentDecision::Neutral);
    }
}
