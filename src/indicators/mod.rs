// Trend indicator module
// 30-week simple moving average of weekly closes and its week-over-week slope

pub mod moving_average;

pub use moving_average::{
    calculate_sma, compute_slope, compute_trend_indicator, price_distance,
    DEFAULT_TREND_PERIOD,
};
