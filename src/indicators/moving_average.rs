/// Number of weekly closes averaged into the trend indicator
pub const DEFAULT_TREND_PERIOD: usize = 30;

/// Calculate Simple Moving Average (SMA) over the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Trend indicator for the week whose close is the last element of `closes`
///
/// `closes` holds the instrument's weekly closes in chronological order, ending
/// at (and including) the week being evaluated. Returns `None` while fewer than
/// `period` closes exist.
pub fn compute_trend_indicator(closes: &[f64], period: usize) -> Option<f64> {
    calculate_sma(closes, period)
}

/// Week-over-week fractional change of the trend indicator
///
/// `None` when either side is missing or the previous value is zero. Under
/// normal conditions this is a small number: a 30-week mean moves slowly.
pub fn compute_slope(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = current?;
    let previous = previous?;

    if previous == 0.0 {
        return None;
    }

    Some((current - previous) / previous)
}

/// Signed distance of price from the trend indicator (0.05 = 5% above)
pub fn price_distance(close: f64, indicator: f64) -> Option<f64> {
    if indicator == 0.0 {
        return None;
    }

    Some((close - indicator) / indicator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_uses_trailing_window() {
        let prices = vec![1.0, 100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
        assert!(calculate_sma(&prices, 0).is_none());
    }

    #[test]
    fn test_trend_indicator_needs_full_period() {
        let closes = vec![50.0; DEFAULT_TREND_PERIOD - 1];
        assert_eq!(compute_trend_indicator(&closes, DEFAULT_TREND_PERIOD), None);
    }

    #[test]
    fn test_trend_indicator_of_identical_closes() {
        let closes = vec![42.5; DEFAULT_TREND_PERIOD];
        assert_eq!(compute_trend_indicator(&closes, DEFAULT_TREND_PERIOD), Some(42.5));
    }

    #[test]
    fn test_trend_indicator_ignores_older_closes() {
        let mut closes = vec![1000.0; 10];
        closes.extend(vec![20.0; DEFAULT_TREND_PERIOD]);
        assert_eq!(compute_trend_indicator(&closes, DEFAULT_TREND_PERIOD), Some(20.0));
    }

    #[test]
    fn test_slope() {
        assert_eq!(compute_slope(Some(100.0), Some(100.0)), Some(0.0));
        let slope = compute_slope(Some(102.0), Some(100.0)).unwrap();
        assert!((slope - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_slope_degenerate_inputs() {
        assert_eq!(compute_slope(Some(5.0), Some(0.0)), None);
        assert_eq!(compute_slope(Some(0.0), Some(0.0)), None);
        assert_eq!(compute_slope(None, Some(100.0)), None);
        assert_eq!(compute_slope(Some(100.0), None), None);
    }

    #[test]
    fn test_price_distance() {
        let d = price_distance(103.0, 100.0).unwrap();
        assert!((d - 0.03).abs() < 1e-12);
        assert_eq!(price_distance(103.0, 0.0), None);
    }
}
