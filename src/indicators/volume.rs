/// Last volume relative to the average of the `period` volumes before it
///
/// `None` when the history is too short or the prior average is not positive.
pub fn calculate_volume_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period + 1 {
        return None;
    }

    let (last, prior) = volumes.split_last()?;
    let average = prior.iter().rev().take(period).sum::<f64>() / period as f64;
    if average <= 0.0 || !average.is_finite() {
        return None;
    }

    Some(last / average)
}
