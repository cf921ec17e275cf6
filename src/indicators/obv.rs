// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Cumulative running total: add volume on an up close, subtract on a
// down close, carry forward unchanged on a flat close.
// =============================================================================

/// Full OBV series, one value per input bar. The first value is always
/// 0 (no prior close to compare against).
pub fn calculate_obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    if closes.is_empty() || closes.len() != volumes.len() {
        return Vec::new();
    }

    let mut obv = Vec::with_capacity(closes.len());
    obv.push(0.0);
    for i in 1..closes.len() {
        let prev = obv[i - 1];
        let next = if closes[i] > closes[i - 1] {
            prev + volumes[i]
        } else if closes[i] < closes[i - 1] {
            prev - volumes[i]
        } else {
            prev
        };
        obv.push(next);
    }
    obv
}

pub fn current_obv(closes: &[f64], volumes: &[f64]) -> Option<f64> {
    calculate_obv(closes, volumes).last().copied()
}

/// `true` if OBV has risen over the trailing `lookback` bars, used by
/// strategies that require volume to confirm a price move.
pub fn obv_rising(closes: &[f64], volumes: &[f64], lookback: usize) -> bool {
    let obv = calculate_obv(closes, volumes);
    if obv.len() <= lookback {
        return false;
    }
    let recent = &obv[obv.len() - lookback - 1..];
    recent.last().unwrap() > recent.first().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obv_empty_input() {
        assert!(calculate_obv(&[], &[]).is_empty());
    }

    #[test]
    fn obv_mismatched_lengths_returns_empty() {
        assert!(calculate_obv(&[1.0, 2.0], &[1.0]).is_empty());
    }

    #[test]
    fn obv_accumulates_on_up_and_down_closes() {
        let closes = vec![10.0, 11.0, 10.5, 12.0];
        let volumes = vec![100.0, 200.0, 150.0, 300.0];
        let obv = calculate_obv(&closes, &volumes);
        // bar0: 0, bar1: +200 (up), bar2: -150 (down), bar3: +300 (up)
        assert_eq!(obv, vec![0.0, 200.0, 50.0, 350.0]);
    }

    #[test]
    fn obv_rising_detects_upward_volume_trend() {
        let closes = vec![10.0, 11.0, 12.0, 13.0];
        let volumes = vec![100.0, 200.0, 200.0, 200.0];
        assert!(obv_rising(&closes, &volumes, 3));
    }
}
