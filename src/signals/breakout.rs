/// Base-breakout validation for BUY signals
///
/// A stage 1 → 2 transition only becomes a BUY when the week is a clean
/// breakout out of a tight, flat base:
/// - price crosses above the trend indicator this week and is not overextended
/// - the indicator is rising
/// - price spent the base window hugging the indicator
/// - the indicator did not fall much over the base
/// - the indicator was mostly flat during the base
use serde::{Deserialize, Serialize};

use crate::models::WeeklyBar;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    /// Weeks before the breakout that form the base
    pub base_weeks: usize,
    /// Extra weeks required before the base starts
    pub min_history_weeks: usize,
    pub crossing_threshold: f64,
    pub max_entry_distance: f64,
    pub near_band_low: f64,
    pub near_band_high: f64,
    /// Base weeks allowed outside the near band
    pub max_base_misses: usize,
    pub max_indicator_decline: f64,
    pub max_base_slope: f64,
    pub min_flat_ratio: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            base_weeks: 16,
            min_history_weeks: 4,
            crossing_threshold: 0.02,
            max_entry_distance: 0.20,
            near_band_low: -0.10,
            near_band_high: 0.05,
            max_base_misses: 2,
            max_indicator_decline: 0.05,
            max_base_slope: 0.03,
            min_flat_ratio: 0.75,
        }
    }
}

impl BreakoutConfig {
    pub fn validate(&self) -> Result<()> {
        use crate::settings::invalid;

        if self.base_weeks == 0 {
            return Err(invalid("breakout.base_weeks must be positive"));
        }
        if self.max_base_misses > self.base_weeks {
            return Err(invalid("breakout.max_base_misses cannot exceed base_weeks"));
        }
        if self.near_band_low >= self.near_band_high {
            return Err(invalid("breakout.near_band_low must be below near_band_high"));
        }
        if self.crossing_threshold >= self.max_entry_distance {
            return Err(invalid("breakout.crossing_threshold must be below max_entry_distance"));
        }
        if !(0.0..=1.0).contains(&self.min_flat_ratio) {
            return Err(invalid("breakout.min_flat_ratio must be within [0, 1]"));
        }
        if self.max_indicator_decline < 0.0 || self.max_base_slope < 0.0 {
            return Err(invalid("breakout thresholds must not be negative"));
        }
        Ok(())
    }
}

/// Outcome of a breakout check, naming the first rule that failed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakoutCheck {
    Valid,
    InsufficientHistory,
    MissingIndicator,
    NoCrossing { previous: f64, current: f64 },
    Overextended { distance: f64 },
    SlopeNotPositive,
    LooseBase { near_weeks: usize },
    IndicatorDeclined { decline: f64 },
    SteepBase { flat_ratio: f64 },
}

impl BreakoutCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, BreakoutCheck::Valid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakoutValidator {
    config: BreakoutConfig,
}

impl BreakoutValidator {
    pub fn new(config: BreakoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BreakoutConfig {
        &self.config
    }

    pub fn validate(&self, series: &[WeeklyBar], i: usize) -> bool {
        self.evaluate(series, i).is_valid()
    }

    /// Check week `i` of a chronological weekly series
    pub fn evaluate(&self, series: &[WeeklyBar], i: usize) -> BreakoutCheck {
        let c = &self.config;

        // Zero-length base: nothing to measure
        if i == 0 || c.base_weeks == 0 || i >= series.len() || i < c.min_history_weeks + c.base_weeks {
            return BreakoutCheck::InsufficientHistory;
        }

        let (Some(current), Some(previous)) = (series[i].distance(), series[i - 1].distance()) else {
            return BreakoutCheck::MissingIndicator;
        };

        if previous >= c.crossing_threshold || current <= c.crossing_threshold {
            return BreakoutCheck::NoCrossing { previous, current };
        }
        if current > c.max_entry_distance {
            return BreakoutCheck::Overextended { distance: current };
        }

        if !series[i].trend_slope.map_or(false, |s| s > 0.0) {
            return BreakoutCheck::SlopeNotPositive;
        }

        let base = &series[i - c.base_weeks..i];

        let near_weeks = base
            .iter()
            .filter(|w| {
                w.distance()
                    .map_or(false, |d| d >= c.near_band_low && d < c.near_band_high)
            })
            .count();
        if near_weeks + c.max_base_misses < c.base_weeks {
            return BreakoutCheck::LooseBase { near_weeks };
        }

        let (Some(start), Some(end)) = (base[0].trend_indicator, series[i].trend_indicator) else {
            return BreakoutCheck::MissingIndicator;
        };
        if start == 0.0 {
            return BreakoutCheck::MissingIndicator;
        }
        let decline = (start - end) / start;
        if decline > c.max_indicator_decline {
            return BreakoutCheck::IndicatorDeclined { decline };
        }

        let flat_weeks = base
            .iter()
            .filter(|w| w.trend_slope.map_or(true, |s| s.abs() <= c.max_base_slope))
            .count();
        let flat_ratio = flat_weeks as f64 / c.base_weeks as f64;
        if flat_ratio < c.min_flat_ratio {
            return BreakoutCheck::SteepBase { flat_ratio };
        }

        BreakoutCheck::Valid
    }
}

/// Breakout check with default thresholds
pub fn validate_breakout(series: &[WeeklyBar], i: usize) -> bool {
    BreakoutValidator::default().validate(series, i)
}
