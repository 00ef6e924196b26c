// =============================================================================
// Rate of Change — momentum indicator
// =============================================================================
//
//   ROC = (price[t] - price[t - period]) / price[t - period] * 100
//
// Positive values indicate upward momentum over the look-back window,
// negative values downward.
// =============================================================================

/// ROC series for `prices` over `period`. Output index 0 corresponds to
/// input index `period`.
pub fn calculate_roc(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() <= period {
        return Vec::new();
    }

    (period..prices.len())
        .map(|i| {
            let prev = prices[i - period];
            if prev == 0.0 { 0.0 } else { (prices[i] - prev) / prev * 100.0 }
        })
        .collect()
}

/// Most recent ROC value, if one could be computed.
pub fn current_roc(prices: &[f64], period: usize) -> Option<f64> {
    calculate_roc(prices, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_roc_matches_formula() {
        let prices: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let series = calculate_roc(&prices, 14);
        assert!(!series.is_empty());
        assert!((series[0] - 1400.0).abs() < 1e-10);
    }

    #[test]
    fn insufficient_data_yields_empty_series() {
        assert!(calculate_roc(&[1.0, 2.0, 3.0], 14).is_empty());
    }

    #[test]
    fn zero_denominator_is_guarded() {
        let prices = vec![0.0, 0.0, 5.0];
        let series = calculate_roc(&prices, 1);
        assert_eq!(series[0], 0.0);
    }
}
