// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// macd = EMA12 - EMA26; signal = EMA9(macd); hist = macd - signal.
// Built on top of `ema::calculate_ema` rather than reimplementing EMA.
// =============================================================================

use super::ema::calculate_ema;

pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Full MACD series. Returns `None` if there isn't enough history for
/// the 26-period EMA plus the 9-period signal line.
pub fn calculate_macd(closes: &[f64]) -> Option<MacdSeries> {
    let ema12 = calculate_ema(closes, 12);
    let ema26 = calculate_ema(closes, 26);
    if ema12.is_empty() || ema26.is_empty() {
        return None;
    }

    // ema12 and ema26 start at different offsets (period - 1); align on
    // the tail, which is the only portion both series cover.
    let offset = ema12.len() - ema26.len();
    let macd: Vec<f64> = ema26
        .iter()
        .zip(&ema12[offset..])
        .map(|(e26, e12)| e12 - e26)
        .collect();

    if macd.len() < 9 {
        return None;
    }
    let signal = calculate_ema(&macd, 9);
    if signal.is_empty() {
        return None;
    }

    let sig_offset = macd.len() - signal.len();
    let histogram: Vec<f64> = signal
        .iter()
        .zip(&macd[sig_offset..])
        .map(|(s, m)| m - s)
        .collect();

    Some(MacdSeries { macd, signal, histogram })
}

/// Current `(macd, signal, histogram)` triple, or `None` if insufficient
/// history.
pub fn current_macd(closes: &[f64]) -> Option<(f64, f64, f64)> {
    let series = calculate_macd(closes)?;
    Some((
        *series.macd.last()?,
        *series.signal.last()?,
        *series.histogram.last()?,
    ))
}

/// `true` if the histogram is increasing over the last two values —
/// used by the MACD strategy's "hist increasing" enter condition (§4.4).
pub fn histogram_increasing(closes: &[f64]) -> bool {
    let Some(series) = calculate_macd(closes) else {
        return false;
    };
    let hist = &series.histogram;
    hist.len() >= 2 && hist[hist.len() - 1] > hist[hist.len() - 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn macd_insufficient_data_returns_none() {
        assert!(calculate_macd(&ascending(20)).is_none());
    }

    #[test]
    fn macd_trending_up_is_positive() {
        let closes = ascending(100);
        let (macd, _signal, _hist) = current_macd(&closes).unwrap();
        assert!(macd > 0.0, "MACD should be positive on a rising series");
    }

    #[test]
    fn histogram_increasing_on_accelerating_trend() {
        // A convex (accelerating) series should show an increasing histogram.
        let closes: Vec<f64> = (1..=100).map(|i| (i as f64).powf(1.05)).collect();
        assert!(histogram_increasing(&closes));
    }
}
