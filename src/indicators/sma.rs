// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Plain rolling mean. Returns one value per window of `period` closes,
// output aligned the same way as `ema::calculate_ema`: empty input or
// period produces an empty result rather than a panic.
// =============================================================================

/// Rolling SMA series. Output element `i` is the mean of
/// `closes[i..i+period]`.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    let mut window_sum: f64 = closes[..period].iter().sum();
    result.push(window_sum / period as f64);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        result.push(window_sum / period as f64);
    }

    result
}

/// Current SMA value only, or `None` if there is not enough history.
pub fn current_sma(closes: &[f64], period: usize) -> Option<f64> {
    calculate_sma(closes, period).last().copied()
}

/// `volumeRatio20` (§3.1 IndicatorSet): latest volume over the SMA of
/// the *preceding* `period` bars (the latest bar itself is excluded
/// from its own baseline, or a volume surge would partially average
/// itself away).
pub fn volume_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    if volumes.len() < period + 1 {
        return None;
    }
    let latest = *volumes.last()?;
    let baseline = &volumes[volumes.len() - period - 1..volumes.len() - 1];
    let sma = current_sma(baseline, period)?;
    if sma == 0.0 {
        return None;
    }
    let ratio = latest / sma;
    ratio.is_finite().then_some(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_empty_input() {
        assert!(calculate_sma(&[], 5).is_empty());
    }

    #[test]
    fn sma_period_zero() {
        assert!(calculate_sma(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn sma_known_values() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&closes, 3);
        assert_eq!(sma, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn volume_ratio_above_one_on_surge() {
        let mut volumes = vec![100.0; 20];
        volumes.push(250.0);
        let ratio = volume_ratio(&volumes, 20).unwrap();
        assert!(ratio > 1.5, "expected surge ratio, got {ratio}");
    }
}
