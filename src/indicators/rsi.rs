// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
//   RS  = avg_gain / avg_loss
//   RSI = 100 - 100 / (1 + RS)
//
// Average gain/loss are seeded with the SMA of the first `period` deltas,
// then carried forward with Wilder's smoothing:
//   avg = (prev_avg * (period - 1) + current) / period
//
// RSI > 70 is read as overbought, RSI < 30 as oversold.
// =============================================================================

/// Full RSI series for `prices` and `period`. Output index 0 corresponds to
/// the first delta window fully seeded, i.e. input index `period`.
///
/// Returns an empty vec for `period == 0`, insufficient history, or a
/// non-finite seed. A zero average loss clamps RSI to 100.0 rather than
/// dividing by zero.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let (seed_gain, seed_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 { (g + d, l) } else { (g, l + d.abs()) }
    });

    let period_f = period as f64;
    let mut avg_gain = seed_gain / period_f;
    let mut avg_loss = seed_loss / period_f;

    let Some(first) = rsi_value(avg_gain, avg_loss) else { return Vec::new() };
    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    series.push(first);

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_value(avg_gain, avg_loss) {
            Some(v) => series.push(v),
            None => break,
        }
    }

    series
}

/// Most recent RSI value together with a qualitative label.
pub fn current_rsi(prices: &[f64], period: usize) -> Option<(f64, &'static str)> {
    let value = *calculate_rsi(prices, period).last()?;
    let label = if value >= 70.0 {
        "overbought"
    } else if value <= 30.0 {
        "oversold"
    } else {
        "neutral"
    };
    Some((value, label))
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(calculate_rsi(&[], 14).is_empty());
    }

    #[test]
    fn zero_period_yields_empty_series() {
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn insufficient_deltas_yields_empty_series() {
        let prices: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(calculate_rsi(&prices, 14).is_empty());
    }

    #[test]
    fn strictly_ascending_series_saturates_at_100() {
        let prices: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let series = calculate_rsi(&prices, 14);
        assert!(!series.is_empty());
        assert!(series.iter().all(|&v| (v - 100.0).abs() < 1e-10));
    }

    #[test]
    fn strictly_descending_series_bottoms_at_0() {
        let prices: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let series = calculate_rsi(&prices, 14);
        assert!(!series.is_empty());
        assert!(series.iter().all(|&v| v.abs() < 1e-10));
    }

    #[test]
    fn flat_series_is_neutral_50() {
        let prices = vec![100.0; 30];
        let series = calculate_rsi(&prices, 14);
        assert!(series.iter().all(|&v| (v - 50.0).abs() < 1e-10));
    }

    #[test]
    fn values_always_stay_within_0_to_100() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03, 44.18, 44.22, 44.57,
            43.42, 42.66, 43.13,
        ];
        let series = calculate_rsi(&prices, 14);
        assert!(series.iter().all(|&v| (0.0..=100.0).contains(&v)));
    }

    #[test]
    fn current_rsi_labels_overbought_and_oversold() {
        let up: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let (v, label) = current_rsi(&up, 14).unwrap();
        assert!((v - 100.0).abs() < 1e-10);
        assert_eq!(label, "overbought");

        let down: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let (v, label) = current_rsi(&down, 14).unwrap();
        assert!(v.abs() < 1e-10);
        assert_eq!(label, "oversold");
    }

    #[test]
    fn current_rsi_none_on_bad_input() {
        assert!(current_rsi(&[], 14).is_none());
    }
}
