use serde::{Deserialize, Serialize};

use super::calculate_sma;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Position of `price` inside the bands: 0.0 at the lower band, 1.0 at the upper.
    /// `None` when the bands have collapsed to a single value.
    pub fn percent_b(&self, price: f64) -> Option<f64> {
        let width = self.upper - self.lower;
        if width <= f64::EPSILON {
            return None;
        }
        Some((price - self.lower) / width)
    }
}

/// Calculate Bollinger Bands over the trailing `period` prices
///
/// Middle band is the SMA; upper/lower are `num_std` population standard
/// deviations away from it.
pub fn calculate_bollinger(prices: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    let middle = calculate_sma(prices, period)?;

    let window = &prices[prices.len() - period..];
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    Some(BollingerBands {
        upper: middle + num_std * std_dev,
        middle,
        lower: middle - num_std * std_dev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bollinger_known_values() {
        // mean 5, population std dev 2
        let prices = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = calculate_bollinger(&prices, 8, 2.0).unwrap();

        assert_eq!(bands.middle, 5.0);
        assert_eq!(bands.upper, 9.0);
        assert_eq!(bands.lower, 1.0);
    }

    #[test]
    fn test_bollinger_uses_trailing_window() {
        let mut prices = vec![1000.0; 10];
        prices.extend(vec![50.0; 20]);

        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert_eq!(bands.middle, 50.0);
        assert_eq!(bands.upper, 50.0);
        assert_eq!(bands.lower, 50.0);
        assert!(bands.percent_b(50.0).is_none());
    }

    #[test]
    fn test_bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0], 20, 2.0).is_none());
    }

    #[test]
    fn test_percent_b() {
        let bands = BollingerBands {
            upper: 110.0,
            middle: 100.0,
            lower: 90.0,
        };
        assert_eq!(bands.percent_b(90.0), Some(0.0));
        assert_eq!(bands.percent_b(100.0), Some(0.5));
        assert_eq!(bands.percent_b(110.0), Some(1.0));
    }
}
