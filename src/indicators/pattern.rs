// =============================================================================
// Single-candle and two-candle pattern flags
// =============================================================================
//
// Feeds the `Pattern` strategy (§4.4): boolean flags on the most recent
// completed bar(s), not a full pattern-recognition engine.
// =============================================================================

use crate::data_fabric::Bar;
use crate::price::Price;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub doji: bool,
    pub hammer: bool,
    pub bullish_engulfing: bool,
    pub bearish_engulfing: bool,
}

/// A bar is a doji when its body is small relative to its full range —
/// open and close within 10% of the high-low range of each other.
fn is_doji(bar: &Bar) -> bool {
    let range = (bar.high - bar.low).as_f64();
    if range <= 0.0 {
        return false;
    }
    let body = (bar.close - bar.open).as_f64().abs();
    body / range <= 0.1
}

/// A hammer has a small body near the top of the range and a lower
/// shadow at least twice the body length, with little to no upper shadow.
fn is_hammer(bar: &Bar) -> bool {
    let range = (bar.high - bar.low).as_f64();
    if range <= 0.0 {
        return false;
    }
    let body_top = bar.open.max(bar.close);
    let body_bot = bar.open.min(bar.close);
    let body = (body_top - body_bot).as_f64();
    let lower_shadow = (body_bot - bar.low).as_f64();
    let upper_shadow = (bar.high - body_top).as_f64();

    if body <= 0.0 {
        return false;
    }
    lower_shadow >= body * 2.0 && upper_shadow <= body * 0.3
}

/// Bullish engulfing: prior bar closed down, current bar is up and its
/// body fully contains the prior bar's body.
fn is_bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    let prev_down = prev.close < prev.open;
    let curr_up = curr.close > curr.open;
    curr_up && prev_down && curr.open <= prev.close && curr.close >= prev.open
}

/// Bearish engulfing: mirror of the bullish case.
fn is_bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    let prev_up = prev.close > prev.open;
    let curr_down = curr.close < curr.open;
    curr_down && prev_up && curr.open >= prev.close && curr.close <= prev.open
}

/// Evaluates all pattern flags against the last two completed bars.
/// Needs at least one bar for doji/hammer, two for engulfing patterns.
pub fn detect(bars: &[Bar]) -> PatternFlags {
    let Some(last) = bars.last() else {
        return PatternFlags::default();
    };

    let mut flags = PatternFlags {
        doji: is_doji(last),
        hammer: is_hammer(last),
        ..Default::default()
    };

    if bars.len() >= 2 {
        let prev = &bars[bars.len() - 2];
        flags.bullish_engulfing = is_bullish_engulfing(prev, last);
        flags.bearish_engulfing = is_bearish_engulfing(prev, last);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: Price::from_f64(open),
            high: Price::from_f64(high),
            low: Price::from_f64(low),
            close: Price::from_f64(close),
            volume: 1000.0,
        }
    }

    #[test]
    fn empty_bars_yields_no_flags() {
        assert_eq!(detect(&[]), PatternFlags::default());
    }

    #[test]
    fn doji_detected_on_tiny_body() {
        let bars = vec![bar(100.0, 102.0, 98.0, 100.1)];
        assert!(detect(&bars).doji);
    }

    #[test]
    fn hammer_detected_on_long_lower_shadow() {
        let bars = vec![bar(100.0, 100.5, 90.0, 100.3)];
        assert!(detect(&bars).hammer);
    }

    #[test]
    fn bullish_engulfing_detected() {
        let bars = vec![bar(100.0, 101.0, 95.0, 96.0), bar(95.5, 102.0, 95.0, 101.0)];
        assert!(detect(&bars).bullish_engulfing);
        assert!(!detect(&bars).bearish_engulfing);
    }

    #[test]
    fn bearish_engulfing_detected() {
        let bars = vec![bar(95.0, 101.0, 94.0, 100.0), bar(101.0, 102.0, 94.5, 95.0)];
        assert!(detect(&bars).bearish_engulfing);
        assert!(!detect(&bars).bullish_engulfing);
    }
}
