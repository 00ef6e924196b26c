// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band is the SMA of the trailing window; upper/lower sit `num_std`
// standard deviations away. `width` is the normalized band spread the ML
// feature vector calls `bollinger_bandwidth`; `position` locates the most
// recent price within the band on a 0..1 scale (0 = lower band, 1 = upper
// band), clamped outside that range when price has pierced a band.
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

impl BollingerResult {
    /// Where `price` sits between the lower and upper band, as a fraction.
    /// Returns `0.5` (centered) when the bands have collapsed to a point.
    pub fn position(&self, price: f64) -> f64 {
        let span = self.upper - self.lower;
        if span <= 0.0 {
            0.5
        } else {
            (price - self.lower) / span
        }
    }
}

/// Bollinger Bands over the trailing `period` entries of `prices`.
///
/// Returns `None` for `period == 0`, insufficient history, a zero middle
/// band, or a non-finite width.
pub fn calculate_bollinger(prices: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerResult { upper, middle, lower, width })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trending_series_has_positive_width() {
        let prices: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width > 0.0);
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
    }

    #[test]
    fn flat_series_has_zero_width() {
        let prices = vec![100.0; 20];
        let bb = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!((bb.width - 0.0).abs() < 1e-10);
    }

    #[test]
    fn position_at_upper_band_is_one() {
        let prices: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!((bb.position(bb.upper) - 1.0).abs() < 1e-10);
        assert!((bb.position(bb.lower) - 0.0).abs() < 1e-10);
    }

    #[test]
    fn position_on_collapsed_band_is_centered() {
        let prices = vec![100.0; 20];
        let bb = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!((bb.position(100.0) - 0.5).abs() < 1e-10);
    }
}
