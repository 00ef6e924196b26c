// =============================================================================
// Moving Average Convergence/Divergence
// =============================================================================
//
// Built directly on `ema::calculate_ema` (the teacher repo has no MACD of
// its own to port):
//
//   macd_line = EMA(prices, fast) - EMA(prices, slow)
//   signal    = EMA(macd_line, signal_period)
//   histogram = macd_line - signal
//
// The fast/slow EMA series start at different offsets into `prices`, so the
// shorter tail of the longer-period series is dropped before subtracting;
// the same alignment is repeated when deriving the histogram from the
// macd/signal pair.
// =============================================================================

use super::ema::calculate_ema;

const FAST_PERIOD: usize = 12;
const SLOW_PERIOD: usize = 26;
const SIGNAL_PERIOD: usize = 9;

#[derive(Debug, Clone, Copy)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Aligned MACD/signal/histogram series for `prices` using the standard
/// 12/26/9 periods. Empty when there isn't enough history for a slow EMA
/// plus a signal-period smoothing of the resulting MACD line.
pub fn calculate_macd(prices: &[f64]) -> Vec<MacdValue> {
    let fast = calculate_ema(prices, FAST_PERIOD);
    let slow = calculate_ema(prices, SLOW_PERIOD);
    if fast.is_empty() || slow.is_empty() || fast.len() < slow.len() {
        return Vec::new();
    }

    let offset = fast.len() - slow.len();
    let macd_line: Vec<f64> = slow.iter().zip(&fast[offset..]).map(|(s, f)| f - s).collect();

    let signal = calculate_ema(&macd_line, SIGNAL_PERIOD);
    if signal.is_empty() {
        return Vec::new();
    }

    let offset = macd_line.len() - signal.len();
    macd_line[offset..]
        .iter()
        .zip(signal.iter())
        .map(|(&macd, &sig)| MacdValue { macd, signal: sig, histogram: macd - sig })
        .collect()
}

/// Most recent MACD point, if enough history exists to compute one.
pub fn current_macd(prices: &[f64]) -> Option<MacdValue> {
    calculate_macd(prices).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_yields_empty_series() {
        let prices: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert!(calculate_macd(&prices).is_empty());
    }

    #[test]
    fn steadily_rising_series_has_positive_histogram() {
        let prices: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let point = current_macd(&prices).expect("enough history for a MACD point");
        assert!(point.macd.is_finite());
        assert!(point.signal.is_finite());
        assert!(point.histogram.is_finite());
        // A monotonically rising series keeps the fast EMA above the slow EMA.
        assert!(point.macd > 0.0);
    }

    #[test]
    fn flat_series_collapses_to_zero() {
        let prices = vec![100.0; 80];
        let point = current_macd(&prices).unwrap();
        assert!(point.macd.abs() < 1e-9);
        assert!(point.histogram.abs() < 1e-9);
    }
}
