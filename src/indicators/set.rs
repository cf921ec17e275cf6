// =============================================================================
// IndicatorSet (§3.1) — the full derived-numbers bundle strategies evaluate
// =============================================================================
//
// Computed once per symbol per tick from the bar history the data fabric
// returns, then handed to every strategy so none of them re-derive the
// same series. Caching by `(symbol, timeframe, barCount)` is the caller's
// responsibility (the data fabric's bar cache already covers the input).
// =============================================================================

use crate::data_fabric::Bar;
use crate::market_data::Candle;

use super::adx::calculate_adx;
use super::atr::calculate_atr;
use super::ema::calculate_ema;
use super::macd::calculate_macd;
use super::obv::current_obv;
use super::pattern::{self, PatternFlags};
use super::rsi::calculate_rsi;
use super::sma::{current_sma, volume_ratio};

#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub ema12: Option<f64>,
    pub ema26: Option<f64>,
    pub rsi14: Option<f64>,
    pub rsi14_prev: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub macd_hist_increasing: bool,
    pub atr14: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_mid: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_width_median20: Option<f64>,
    pub volume_ratio20: Option<f64>,
    pub obv: Option<f64>,
    pub patterns: PatternFlags,
}

fn bars_to_candles(bars: &[Bar]) -> Vec<Candle> {
    bars.iter()
        .map(|b| Candle {
            open_time: b.timestamp.timestamp_millis(),
            close_time: b.timestamp.timestamp_millis(),
            open: b.open.as_f64(),
            high: b.high.as_f64(),
            low: b.low.as_f64(),
            close: b.close.as_f64(),
            volume: b.volume,
            quote_volume: 0.0,
            trades_count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        })
        .collect()
}

/// Rolling median of Bollinger width over the trailing `window` bars,
/// used by the Bollinger-Expansion strategy's "≥ rolling median × 1.2" gate.
fn rolling_bb_width_median(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 20 {
        return None;
    }
    let mut widths = Vec::with_capacity(window);
    for i in closes.len() - window..closes.len() {
        let slice = &closes[..=i];
        if let Some(bb) = super::bollinger::calculate_bollinger(slice, 20, 2.0) {
            widths.push(bb.width);
        }
    }
    if widths.is_empty() {
        return None;
    }
    widths.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Some(widths[widths.len() / 2])
}

pub fn compute(bars: &[Bar]) -> IndicatorSet {
    let closes: Vec<f64> = bars.iter().map(|b| b.close.as_f64()).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let candles = bars_to_candles(bars);

    let rsi_series = calculate_rsi(&closes, 14);
    let rsi14 = rsi_series.last().copied();
    let rsi14_prev = if rsi_series.len() >= 2 {
        rsi_series.get(rsi_series.len() - 2).copied()
    } else {
        None
    };

    let macd_series = calculate_macd(&closes);
    let (macd, macd_signal, macd_hist) = macd_series
        .as_ref()
        .and_then(|s| Some((*s.macd.last()?, *s.signal.last()?, *s.histogram.last()?)))
        .map_or((None, None, None), |(a, b, c)| (Some(a), Some(b), Some(c)));

    let bb = super::bollinger::calculate_bollinger(&closes, 20, 2.0);

    IndicatorSet {
        sma20: current_sma(&closes, 20),
        sma50: current_sma(&closes, 50),
        sma200: current_sma(&closes, 200),
        ema12: calculate_ema(&closes, 12).last().copied(),
        ema26: calculate_ema(&closes, 26).last().copied(),
        rsi14,
        rsi14_prev,
        macd,
        macd_signal,
        macd_hist,
        macd_hist_increasing: super::macd::histogram_increasing(&closes),
        atr14: calculate_atr(&candles, 14),
        bb_upper: bb.as_ref().map(|b| b.upper),
        bb_mid: bb.as_ref().map(|b| b.middle),
        bb_lower: bb.as_ref().map(|b| b.lower),
        bb_width: bb.as_ref().map(|b| b.width),
        bb_width_median20: rolling_bb_width_median(&closes, 20),
        volume_ratio20: volume_ratio(&volumes, 20),
        obv: current_obv(&closes, &volumes),
        patterns: pattern::detect(bars),
    }
}

pub fn adx14(bars: &[Bar]) -> Option<f64> {
    calculate_adx(&bars_to_candles(bars), 14)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::Price;
    use chrono::Utc;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: Price::from_f64(close - 0.1),
            high: Price::from_f64(close + 0.2),
            low: Price::from_f64(close - 0.2),
            close: Price::from_f64(close),
            volume,
        }
    }

    #[test]
    fn compute_on_short_history_leaves_fields_empty() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(100.0 + i as f64, 1000.0)).collect();
        let set = compute(&bars);
        assert!(set.sma200.is_none());
        assert!(set.macd.is_none());
    }

    #[test]
    fn compute_on_long_history_fills_core_fields() {
        let bars: Vec<Bar> = (0..250).map(|i| bar(100.0 + i as f64 * 0.1, 1000.0)).collect();
        let set = compute(&bars);
        assert!(set.sma20.is_some());
        assert!(set.sma200.is_some());
        assert!(set.rsi14.is_some());
        assert!(set.macd.is_some());
        assert!(set.bb_mid.is_some());
    }
}
