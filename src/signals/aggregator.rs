// =============================================================================
// Agreement Aggregator (§4.4)
// =============================================================================

use std::cmp::Ordering;
use std::time::Duration as StdDuration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AgreementLevel, SentimentDecision, VerdictKind};

use super::strategies::{strategy_weight, StrategyVerdict};

const PER_STRATEGY_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// Aggregator output (§3.1 CompositeSignal), minus the fields only the
/// caller can fill in (`expectedReturn` depends on sizing, not signals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub symbol: String,
    pub confidence: f64,
    pub agreement_level: AgreementLevel,
    pub strategy_count: usize,
    pub contributing_strategies: Vec<String>,
    pub sentiment_score: f64,
    pub volume_ratio: f64,
    pub rationale: String,
}

/// Why a candidate signal didn't make it to an order — carries the exact
/// wire-format reason string §7 requires on every `SignalRejected` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRejection {
    SentimentContradiction,
    StrategyExitVeto,
    InsufficientAgreement,
    BelowConfidenceGate,
}

impl SignalRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::SentimentContradiction => "sentiment_contradiction",
            Self::StrategyExitVeto => "strategy_exit_veto",
            Self::InsufficientAgreement => "insufficient_agreement",
            Self::BelowConfidenceGate => "below_confidence_gate",
        }
    }
}

/// Runs every strategy concurrently (each wrapped in its own timeout),
/// then applies the gate/veto/weighted-mean rules of §4.4.
pub async fn aggregate<F>(
    symbol: &str,
    sentiment_score: f64,
    sentiment_decision: SentimentDecision,
    volume_ratio: f64,
    min_agreeing: usize,
    min_confidence: f64,
    strategy_futures: Vec<F>,
) -> Result<CompositeSignal, SignalRejection>
where
    F: std::future::Future<Output = StrategyVerdict>,
{
    let timed = strategy_futures.into_iter().map(|fut| async move {
        match tokio::time::timeout(PER_STRATEGY_TIMEOUT, fut).await {
            Ok(verdict) => verdict,
            Err(_) => StrategyVerdict {
                strategy_id: "timeout",
                verdict: VerdictKind::Skip,
                confidence: 0.0,
                reason: "strategy timed out".to_string(),
            },
        }
    });
    let verdicts = join_all(timed).await;
    aggregate_verdicts(symbol, sentiment_score, sentiment_decision, volume_ratio, min_agreeing, min_confidence, &verdicts)
}

/// Pure aggregation core, split out from `aggregate` so tests can drive
/// it with pre-computed verdicts instead of futures. §4.4's veto fires
/// before the agreement/confidence gates ("reject regardless"): either a
/// sentiment `Block` or any strategy emitting `Exit` overrides everything
/// else, independent of how strong the entry agreement would have been.
pub fn aggregate_verdicts(
    symbol: &str,
    sentiment_score: f64,
    sentiment_decision: SentimentDecision,
    volume_ratio: f64,
    min_agreeing: usize,
    min_confidence: f64,
    verdicts: &[StrategyVerdict],
) -> Result<CompositeSignal, SignalRejection> {
    if sentiment_decision == SentimentDecision::Block {
        debug!(symbol, "vetoed: sentiment filter returned Block");
        return Err(SignalRejection::SentimentContradiction);
    }
    if verdicts.iter().any(|v| v.verdict == VerdictKind::Exit) {
        debug!(symbol, "vetoed: at least one strategy emitted Exit");
        return Err(SignalRejection::StrategyExitVeto);
    }

    let enterers: Vec<&StrategyVerdict> = verdicts.iter().filter(|v| v.verdict == VerdictKind::Enter).collect();
    let agree = enterers.len();
    if agree < min_agreeing {
        debug!(symbol, agree, min_agreeing, "rejected: insufficient agreement");
        return Err(SignalRejection::InsufficientAgreement);
    }

    let level = AgreementLevel::from_count(agree);
    let total_weight: f64 = enterers.iter().map(|v| strategy_weight(v.strategy_id)).sum();
    let weighted_mean = if total_weight > 0.0 {
        enterers.iter().map(|v| v.confidence * strategy_weight(v.strategy_id)).sum::<f64>() / total_weight
    } else {
        0.0
    };
    let confidence = (weighted_mean * level.confidence_boost()).min(1.0);

    if confidence < min_confidence {
        debug!(symbol, confidence, min_confidence, "rejected: below confidence gate");
        return Err(SignalRejection::BelowConfidenceGate);
    }

    Ok(CompositeSignal {
        symbol: symbol.to_string(),
        confidence,
        agreement_level: level,
        strategy_count: agree,
        contributing_strategies: enterers.iter().map(|v| v.strategy_id.to_string()).collect(),
        sentiment_score,
        volume_ratio,
        rationale: format!("{agree} strategies agree, weighted confidence {weighted_mean:.3} boosted to {confidence:.3}"),
    })
}

/// Tie-break order for §4.4: higher agreementLevel, then higher
/// sentimentScore, then higher volumeRatio, then lexicographic symbol.
/// Returns `Ordering` such that sorting descending yields the winner first.
pub fn compare_for_tiebreak(a: &CompositeSignal, b: &CompositeSignal) -> Ordering {
    b.agreement_level
        .cmp(&a.agreement_level)
        .then_with(|| b.sentiment_score.partial_cmp(&a.sentiment_score).unwrap_or(Ordering::Equal))
        .then_with(|| b.volume_ratio.partial_cmp(&a.volume_ratio).unwrap_or(Ordering::Equal))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(id: &'static str, kind: VerdictKind, confidence: f64) -> StrategyVerdict {
        StrategyVerdict { strategy_id: id, verdict: kind, confidence, reason: String::new() }
    }

    #[test]
    fn rejects_below_min_agreeing() {
        let verdicts = vec![verdict("trend-sma", VerdictKind::Enter, 0.9)];
        let result = aggregate_verdicts("TQQQ", 0.0, SentimentDecision::Neutral, 1.0, 2, 0.90, &verdicts);
        assert_eq!(result.unwrap_err(), SignalRejection::InsufficientAgreement);
    }

    #[test]
    fn vetoed_by_any_exit() {
        let verdicts = vec![
            verdict("trend-sma", VerdictKind::Enter, 0.95),
            verdict("macd", VerdictKind::Enter, 0.95),
            verdict("news-sentiment", VerdictKind::Exit, 0.9),
        ];
        let result = aggregate_verdicts("TQQQ", 0.0, SentimentDecision::Neutral, 1.0, 2, 0.90, &verdicts);
        assert_eq!(result.unwrap_err(), SignalRejection::StrategyExitVeto);
    }

    #[test]
    fn vetoed_by_sentiment_block_even_with_full_agreement() {
        let verdicts = vec![
            verdict("trend-sma", VerdictKind::Enter, 0.95),
            verdict("macd", VerdictKind::Enter, 0.95),
            verdict("pattern", VerdictKind::Enter, 0.95),
        ];
        let result = aggregate_verdicts("SQQQ", -0.5, SentimentDecision::Block, 1.0, 2, 0.90, &verdicts);
        assert_eq!(result.unwrap_err(), SignalRejection::SentimentContradiction);
        assert_eq!(result.unwrap_err().reason_code(), "sentiment_contradiction");
    }

    #[test]
    fn accepts_on_sufficient_agreement_and_confidence() {
        let verdicts = vec![
            verdict("trend-sma", VerdictKind::Enter, 0.95),
            verdict("macd", VerdictKind::Enter, 0.95),
            verdict("pattern", VerdictKind::Enter, 0.95),
        ];
        let result = aggregate_verdicts("TQQQ", 0.2, SentimentDecision::Neutral, 1.8, 2, 0.90, &verdicts).unwrap();
        assert_eq!(result.agreement_level, AgreementLevel::High);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn rejected_below_confidence_gate() {
        let verdicts = vec![
            verdict("trend-sma", VerdictKind::Enter, 0.3),
            verdict("macd", VerdictKind::Enter, 0.3),
        ];
        let result = aggregate_verdicts("TQQQ", 0.0, SentimentDecision::Neutral, 1.0, 2, 0.90, &verdicts);
        assert_eq!(result.unwrap_err(), SignalRejection::BelowConfidenceGate);
    }

    #[test]
    fn tiebreak_prefers_higher_agreement_then_sentiment_then_volume_then_symbol() {
        let mut a = CompositeSignal {
            symbol: "TQQQ".to_string(),
            confidence: 0.95,
            agreement_level: AgreementLevel::High,
            strategy_count: 3,
            contributing_strategies: vec![],
            sentiment_score: 0.5,
            volume_ratio: 2.0,
            rationale: String::new(),
        };
        let mut b = a.clone();
        b.symbol = "SOXL".to_string();
        b.agreement_level = AgreementLevel::Medium;

        let mut signals = vec![b.clone(), a.clone()];
        signals.sort_by(compare_for_tiebreak);
        assert_eq!(signals[0].symbol, "TQQQ");

        // Equal agreement, tie broken by sentiment score.
        b.agreement_level = AgreementLevel::High;
        b.sentiment_score = 0.9;
        let mut signals = vec![a.clone(), b.clone()];
        signals.sort_by(compare_for_tiebreak);
        assert_eq!(signals[0].symbol, "SOXL");

        // Equal agreement and sentiment, tie broken lexicographically.
        a.sentiment_score = 0.9;
        let mut signals = vec![b, a];
        signals.sort_by(compare_for_tiebreak);
        assert_eq!(signals[0].symbol, "SOXL");
    }
}
