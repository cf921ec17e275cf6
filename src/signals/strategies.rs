// =============================================================================
// Strategy registry (§4.4)
// =============================================================================
//
// Eight independent, pure strategies, each evaluating the same
// `(symbol, quote, bars, indicators, sentiment)` input and returning a
// `StrategyVerdict`. No strategy holds state between calls.
// =============================================================================

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::data_fabric::{Bar, Quote};
use crate::indicators::IndicatorSet;
use crate::sentiment::SentimentVerdict;
use crate::types::{Direction, SentimentDecision, VerdictKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVerdict {
    pub strategy_id: &'static str,
    pub verdict: VerdictKind,
    pub confidence: f64,
    pub reason: String,
}

impl StrategyVerdict {
    fn skip(strategy_id: &'static str, reason: impl Into<String>) -> Self {
        Self { strategy_id, verdict: VerdictKind::Skip, confidence: 0.0, reason: reason.into() }
    }

    fn enter(strategy_id: &'static str, confidence: f64, reason: impl Into<String>) -> Self {
        Self { strategy_id, verdict: VerdictKind::Enter, confidence: confidence.clamp(0.0, 1.0), reason: reason.into() }
    }
}

/// Per-strategy weight used by the aggregator's weighted mean (§4.4).
/// Equal-weighted by default; kept as a lookup so future calibration
/// doesn't require touching the aggregation logic.
pub fn strategy_weight(strategy_id: &str) -> f64 {
    match strategy_id {
        "trend-sma" => 0.15,
        "momentum-rsi" => 0.12,
        "macd" => 0.13,
        "volume-surge" => 0.10,
        "orb-breakout" => 0.15,
        "bollinger-expansion" => 0.10,
        "news-sentiment" => 0.10,
        "pattern" => 0.15,
        _ => 0.10,
    }
}

pub struct StrategyInput<'a> {
    pub symbol: &'a str,
    pub direction: Direction,
    pub quote: &'a Quote,
    pub bars: &'a [Bar],
    pub indicators: &'a IndicatorSet,
    pub sentiment: SentimentVerdict,
}

pub fn trend_sma(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "trend-sma";
    let (Some(close), Some(sma20), Some(sma50), Some(sma200)) = (
        Some(input.quote.last_price.as_f64()),
        input.indicators.sma20,
        input.indicators.sma50,
        input.indicators.sma200,
    ) else {
        return StrategyVerdict::skip(ID, "insufficient history for sma20/50/200");
    };

    if close > sma20 && sma20 > sma50 && sma50 > sma200 {
        let distance = (close - sma200) / sma200;
        StrategyVerdict::enter(ID, (distance * 5.0).min(1.0), format!("close {distance:.4} above sma200"))
    } else {
        StrategyVerdict::skip(ID, "sma stack not aligned")
    }
}

pub fn momentum_rsi(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "momentum-rsi";
    let (Some(rsi), Some(prev)) = (input.indicators.rsi14, input.indicators.rsi14_prev) else {
        return StrategyVerdict::skip(ID, "insufficient history for rsi14");
    };

    if (55.0..=85.0).contains(&rsi) && rsi > prev {
        StrategyVerdict::enter(ID, (rsi - 55.0) / 30.0, format!("rsi14 {rsi:.1} rising"))
    } else {
        StrategyVerdict::skip(ID, format!("rsi14 {rsi:.1} outside band or falling"))
    }
}

pub fn macd(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "macd";
    let (Some(macd), Some(signal), Some(hist)) =
        (input.indicators.macd, input.indicators.macd_signal, input.indicators.macd_hist)
    else {
        return StrategyVerdict::skip(ID, "insufficient history for macd");
    };

    if macd > signal && hist > 0.0 && input.indicators.macd_hist_increasing {
        let confidence = (hist.abs() / (macd.abs().max(1e-6))).min(1.0);
        StrategyVerdict::enter(ID, confidence, format!("macd hist {hist:.4} increasing"))
    } else {
        StrategyVerdict::skip(ID, "macd conditions not met")
    }
}

pub fn volume_surge(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "volume-surge";
    let Some(ratio) = input.indicators.volume_ratio20 else {
        return StrategyVerdict::skip(ID, "insufficient history for volumeRatio20");
    };
    let Some(last) = input.bars.last() else {
        return StrategyVerdict::skip(ID, "no bars");
    };
    let bullish = last.close > last.open;

    if ratio >= 1.5 && bullish {
        StrategyVerdict::enter(ID, (ratio / 3.0).min(1.0), format!("volume ratio {ratio:.2} on bullish candle"))
    } else {
        StrategyVerdict::skip(ID, format!("volume ratio {ratio:.2} or candle not bullish"))
    }
}

/// First 15-minute bar of regular trading hours (09:30-09:45 exchange
/// local time). `bars` is assumed pre-filtered to today's RTH bars by
/// the caller — this strategy only locates the opening range within it.
pub fn orb_breakout(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "orb-breakout";
    if input.bars.len() < 2 {
        return StrategyVerdict::skip(ID, "insufficient bars for opening range");
    }

    let opening_bar = input.bars.iter().find(|b| {
        let t = b.timestamp.time();
        t.hour() == 9 && (30..45).contains(&t.minute())
    });
    let Some(opening) = opening_bar else {
        return StrategyVerdict::skip(ID, "opening range bar not found");
    };
    let close = input.quote.last_price.as_f64();
    let level = opening.high.as_f64();

    if close > level {
        let pct = (close - level) / level;
        StrategyVerdict::enter(ID, (pct * 20.0).min(1.0), format!("{pct:.4} above opening range high"))
    } else {
        StrategyVerdict::skip(ID, "below opening range high")
    }
}

pub fn bollinger_expansion(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "bollinger-expansion";
    let (Some(width), Some(median), Some(mid)) = (
        input.indicators.bb_width,
        input.indicators.bb_width_median20,
        input.indicators.bb_mid,
    ) else {
        return StrategyVerdict::skip(ID, "insufficient history for bollinger width");
    };
    let close = input.quote.last_price.as_f64();

    if width >= median * 1.2 && close > mid {
        let expansion = width / median.max(1e-6);
        StrategyVerdict::enter(ID, (expansion - 1.0).min(1.0), format!("bbWidth {expansion:.2}x median"))
    } else {
        StrategyVerdict::skip(ID, "bands not expanding above median")
    }
}

pub fn news_sentiment(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "news-sentiment";
    match input.sentiment.decision {
        SentimentDecision::Boost => StrategyVerdict::enter(
            ID,
            input.sentiment.confidence,
            format!("aligned sentiment {:.2}", input.sentiment.score),
        ),
        SentimentDecision::Block => StrategyVerdict {
            strategy_id: ID,
            verdict: VerdictKind::Exit,
            confidence: input.sentiment.confidence,
            reason: format!("blocked sentiment {:.2}", input.sentiment.score),
        },
        SentimentDecision::Neutral => StrategyVerdict::skip(ID, "sentiment neutral"),
    }
}

pub fn pattern(input: &StrategyInput) -> StrategyVerdict {
    const ID: &str = "pattern";
    let flags = input.indicators.patterns;
    if flags.hammer || flags.bullish_engulfing {
        let confidence = if flags.hammer && flags.bullish_engulfing { 0.8 } else { 0.6 };
        StrategyVerdict::enter(ID, confidence, "hammer or bullish engulfing on last bar")
    } else {
        StrategyVerdict::skip(ID, "no actionable pattern on last bar")
    }
}

/// The full registry, in a fixed order (tie-break and logging rely on a
/// stable order, not on strategy_weight's iteration order).
pub fn evaluate_all(input: &StrategyInput) -> Vec<StrategyVerdict> {
    vec![
        trend_sma(input),
        momentum_rsi(input),
        macd(input),
        volume_surge(input),
        orb_breakout(input),
        bollinger_expansion(input),
        news_sentiment(input),
        pattern(input),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::Price;
    use chrono::Utc;

    fn quote(price: f64) -> Quote {
        Quote {
            symbol: "TQQQ".to_string(),
            last_price: Price::from_f64(price),
            bid: Price::from_f64(price),
            ask: Price::from_f64(price),
            open: Price::from_f64(price),
            high: Price::from_f64(price),
            low: Price::from_f64(price),
            volume: 1_000_000.0,
            timestamp: Utc::now(),
        }
    }

    fn neutral_sentiment() -> SentimentVerdict {
        SentimentVerdict { decision: SentimentDecision::Neutral, score: 0.0, confidence: 0.0 }
    }

    #[test]
    fn trend_sma_enters_on_aligned_stack() {
        let indicators = IndicatorSet { sma20: Some(100.0), sma50: Some(95.0), sma200: Some(90.0), ..Default::default() };
        let q = quote(105.0);
        let input = StrategyInput {
            symbol: "TQQQ",
            direction: Direction::Bull,
            quote: &q,
            bars: &[],
            indicators: &indicators,
            sentiment: neutral_sentiment(),
        };
        assert_eq!(trend_sma(&input).verdict, VerdictKind::Enter);
    }

    #[test]
    fn trend_sma_skips_on_insufficient_history() {
        let indicators = IndicatorSet::default();
        let q = quote(105.0);
        let input = StrategyInput {
            symbol: "TQQQ",
            direction: Direction::Bull,
            quote: &q,
            bars: &[],
            indicators: &indicators,
            sentiment: neutral_sentiment(),
        };
        assert_eq!(trend_sma(&input).verdict, VerdictKind::Skip);
    }

    #[test]
    fn news_sentiment_block_becomes_exit_verdict() {
        let indicators = IndicatorSet::default();
        let q = quote(100.0);
        let input = StrategyInput {
            symbol: "SQQQ",
            direction: Direction::Bear,
            quote: &q,
            bars: &[],
            indicators: &indicators,
            sentiment: SentimentVerdict { decision: SentimentDecision::Block, score: -0.5, confidence: 0.9 },
        };
        assert_eq!(news_sentiment(&input).verdict, VerdictKind::Exit);
    }
}
