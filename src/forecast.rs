pub const FORECAST_WINDOW: usize = 3;

/// Trailing moving average of the last `window` prices; `None` until the
/// history holds at least `window` entries.
pub fn moving_average(prices: &[f64], window: usize) -> Option<f64> {
    if window == 0 || prices.len() < window {
        return None;
    }
    let tail = &prices[prices.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

pub fn forecast(prices: &[f64]) -> Option<f64> {
    moving_average(prices, FORECAST_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_prices_average() {
        assert_eq!(forecast(&[100.0, 90.0, 80.0]), Some(90.0));
    }

    #[test]
    fn uses_only_the_trailing_window() {
        assert_eq!(forecast(&[1000.0, 30.0, 60.0, 90.0]), Some(60.0));
    }

    #[test]
    fn too_short_history_has_no_forecast() {
        assert_eq!(forecast(&[]), None);
        assert_eq!(forecast(&[100.0, 90.0]), None);
        assert_eq!(moving_average(&[1.0], 0), None);
    }
}
