/// Calculate Simple Moving Average (SMA) over the trailing `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
///
/// Smoothing factor is `2 / (period + 1)`, seeded with the simple average
/// of the first `period` prices.
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Start with SMA
    let initial_sma = calculate_sma(&prices[0..period], period)?;

    let mut ema = initial_sma;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }

    Some(ema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
    }

    #[test]
    fn test_sma_uses_trailing_window() {
        let prices = vec![1.0, 1.0, 10.0, 20.0];
        assert_eq!(calculate_sma(&prices, 2), Some(15.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
    }

    #[test]
    fn test_ema() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = calculate_ema(&prices, 5);
        assert!(ema.is_some());
        assert!(ema.unwrap() > 104.0); // EMA should be above initial SMA
    }

    #[test]
    fn test_ema_seed_only() {
        // Exactly `period` points: EMA is the seed SMA
        let prices = vec![2.0, 4.0, 6.0];
        assert_eq!(calculate_ema(&prices, 3), Some(4.0));
    }

    #[test]
    fn test_ema_200_smoothing_factor() {
        let mut prices = vec![100.0; 200];
        prices.push(301.0);

        // seed 100, alpha 2/201 -> 100 + 201 * 2/201 = 102
        let ema = calculate_ema(&prices, 200).unwrap();
        assert!((ema - 102.0).abs() < 1e-9);
    }
}
